//! The session manager: one owner for the session and its lifecycle.
//!
//! Everything that can change whether someone is signed in goes through
//! here: initialization on page load, interactive login, logout, adopting a
//! renewed token, being told by the backend that the token is no good.
//!
//! # Single-flight initialization
//!
//! Several parts of the application may call [`SessionManager::initialize`]
//! while the first call is still waiting on the provider. They all join the
//! same attempt:
//!
//! ```text
//!  caller A ──initialize()──┐
//!  caller B ──initialize()──┼──→ Shared attempt ──→ IdpClient::init (once)
//!  caller C ──initialize()──┘          │
//!                                      ▼
//!                      every caller gets the same Result
//! ```
//!
//! # Concurrency note
//!
//! State lives behind a `std::sync::Mutex`. It's held only for short,
//! synchronous reads and writes and never across an `.await`. Each attempt
//! carries a generation number. A logout in the middle of an attempt bumps
//! the generation, and the attempt's result is then dropped instead of
//! written.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use keygate_protocol::{CompactJwt, Session, TokenCodec};
use keygate_redirect::{RedirectArtifact, RedirectSanitizer};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    ArtifactRegistry, FailureReason, IdpClient, IdpError, InitOptions, InitializationState,
    LoginOptions, LogoutOptions, SessionConfig, SessionError, SessionSnapshot, Storage,
};

/// Registry entry holding where the provider should send the user back to.
const REDIRECT_KEY: &str = "login.redirect_uri";
/// Registry entry holding a random marker for the current login attempt.
const ATTEMPT_KEY: &str = "login.attempt";

type PendingInit = Shared<BoxFuture<'static, Result<bool, SessionError>>>;

struct ManagerState {
    init: InitializationState,
    session: Option<Arc<Session>>,
    pending: Option<PendingInit>,
    generation: u64,
    last_error: Option<SessionError>,
    /// Set while a forced login is on its way to the provider.
    forced_login: bool,
}

struct Inner<I> {
    idp: I,
    sanitizer: Arc<RedirectSanitizer>,
    registry: ArtifactRegistry,
    config: SessionConfig,
    state: Mutex<ManagerState>,
}

/// Coordinates the session lifecycle against an [`IdpClient`].
///
/// A cheap-to-clone handle. Every clone talks to the same state.
pub struct SessionManager<I: IdpClient> {
    inner: Arc<Inner<I>>,
}

impl<I: IdpClient> Clone for SessionManager<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: IdpClient> SessionManager<I> {
    /// Creates a manager. Nothing is contacted until [`initialize`](Self::initialize).
    ///
    /// `config` is passed through [`SessionConfig::validated`].
    pub fn new(
        idp: I,
        sanitizer: Arc<RedirectSanitizer>,
        storage: Arc<dyn Storage>,
        config: SessionConfig,
    ) -> Self {
        let config = config.validated();
        let registry = ArtifactRegistry::new(config.storage_namespace.clone(), storage);
        Self {
            inner: Arc::new(Inner {
                idp,
                sanitizer,
                registry,
                config,
                state: Mutex::new(ManagerState {
                    init: InitializationState::Uninitialized,
                    session: None,
                    pending: None,
                    generation: 0,
                    last_error: None,
                    forced_login: false,
                }),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Establishes whether someone is signed in.
    ///
    /// - Already `Ready`: resolves at once with whether a session exists.
    /// - An attempt is in flight: waits for that attempt.
    /// - Otherwise: starts a new attempt.
    ///
    /// A bad authorization response in the address is not an error here.
    /// The manager cleans up, sends the user to the login page, and resolves
    /// `Ok(false)`. [`state`](Self::state) then reads
    /// `Failed(ProtocolMismatch)`.
    ///
    /// # Errors
    /// [`SessionError::InitializationTimeout`] when the provider doesn't
    /// answer in time, otherwise whatever the provider failure maps to.
    pub async fn initialize(&self, options: InitOptions) -> Result<bool, SessionError> {
        let pending = {
            let mut state = self.inner.lock_state();
            match (state.init, state.pending.clone()) {
                (InitializationState::Ready, _) => return Ok(state.session.is_some()),
                (InitializationState::Initializing, Some(pending)) => {
                    debug!(generation = state.generation, "joining in-flight initialization");
                    pending
                }
                _ => self.start_attempt(&mut state, options),
            }
        };
        pending.await
    }

    /// Starts an interactive login, or skips straight to the post-login
    /// page if a session already exists.
    ///
    /// The provider is always given a redirect target. Without one in
    /// `options`, it's the current origin plus the post-login path.
    pub async fn login(&self, options: LoginOptions) -> Result<(), SessionError> {
        let config = &self.inner.config;
        if self.is_logged_in() {
            info!("already signed in, skipping provider login");
            self.inner.navigate(&config.post_login_path);
            return Ok(());
        }

        let redirect_uri = options
            .redirect_uri
            .unwrap_or_else(|| self.inner.absolute(&config.post_login_path));

        for (name, value) in [(REDIRECT_KEY, redirect_uri.clone()), (ATTEMPT_KEY, random_hex())] {
            if let Err(e) = self.inner.registry.put(name, &value) {
                warn!(entry = name, error = %e, "could not record login artifact");
            }
        }

        info!(%redirect_uri, "starting provider login");
        let options = LoginOptions {
            redirect_uri: Some(redirect_uri),
        };
        self.inner.idp.login(&options).await.map_err(|e| {
            let err = SessionError::from(e);
            warn!(error = %err, "provider login failed");
            err
        })
    }

    /// Ends the session locally and at the provider.
    ///
    /// The local session is gone before the provider is contacted. If the
    /// provider call fails, the user is sent to `/` instead.
    pub async fn logout(&self, options: LogoutOptions) {
        {
            let mut state = self.inner.lock_state();
            state.session = None;
            state.init = InitializationState::Uninitialized;
            state.pending = None;
            state.last_error = None;
            state.forced_login = false;
            state.generation += 1;
            info!(generation = state.generation, "signing out");
        }
        self.inner.registry.purge();

        let redirect_uri = options
            .redirect_uri
            .or_else(|| self.inner.sanitizer.location().origin());
        let options = LogoutOptions { redirect_uri };
        if let Err(e) = self.inner.idp.logout(&options).await {
            warn!("provider logout failed, returning to root");
            debug!(error = %e, "provider logout error");
            self.inner.navigate("/");
        }
    }

    /// Sends the user back through login after the current session has
    /// proven unusable (a 401, a failed renewal).
    ///
    /// Callers that arrive while a forced login is already under way return
    /// `Ok(())` without contacting the provider again. The manager is left
    /// `Uninitialized`, so the next [`initialize`](Self::initialize) asks
    /// the provider afresh.
    pub async fn force_login(&self) -> Result<(), SessionError> {
        {
            let mut state = self.inner.lock_state();
            if state.forced_login {
                debug!("forced login already under way");
                return Ok(());
            }
            state.forced_login = true;
            state.session = None;
            state.init = InitializationState::Uninitialized;
            state.pending = None;
            state.generation += 1;
            info!(generation = state.generation, "session unusable, restarting login");
        }
        self.inner.idp.clear_token();

        let result = self.login(LoginOptions::default()).await;
        if result.is_err() {
            self.inner.lock_state().forced_login = false;
        }
        result
    }

    /// Rebuilds the session from the provider client's current token and
    /// swaps it in whole.
    ///
    /// # Errors
    /// [`SessionError::Unauthenticated`] if there's no session to replace
    /// (signed out while renewing). [`SessionError::MalformedSession`] if the
    /// renewed token is unusable.
    pub fn adopt_renewed_token(&self) -> Result<Arc<Session>, SessionError> {
        let renewed = Arc::new(self.inner.materialize()?);
        let mut state = self.inner.lock_state();
        if state.session.is_none() {
            return Err(SessionError::Unauthenticated);
        }
        debug!(expiry = renewed.expiry_epoch_seconds, "adopted renewed token");
        state.session = Some(Arc::clone(&renewed));
        Ok(renewed)
    }

    /// Drops the local session without touching the provider or the
    /// initialization state.
    pub fn invalidate_session(&self) {
        let mut state = self.inner.lock_state();
        if state.session.take().is_some() {
            info!("session invalidated");
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The current session, if any.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.lock_state().session.clone()
    }

    /// State and session, read together.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock_state();
        SessionSnapshot {
            state: state.init,
            session: state.session.clone(),
        }
    }

    /// The raw bearer token of the current session.
    pub fn token(&self) -> Option<String> {
        self.session().map(|s| s.raw_token.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.lock_state().session.is_some()
    }

    /// `true` once the provider has answered (`Ready`), signed in or not.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock_state().init == InitializationState::Ready
    }

    pub fn state(&self) -> InitializationState {
        self.inner.lock_state().init
    }

    /// The error that ended the most recent attempt, including one the
    /// manager recovered from by itself.
    pub fn last_failure(&self) -> Option<SessionError> {
        self.inner.lock_state().last_error.clone()
    }

    /// The provider client.
    pub fn idp(&self) -> &I {
        &self.inner.idp
    }

    pub fn sanitizer(&self) -> &Arc<RedirectSanitizer> {
        &self.inner.sanitizer
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Attempt plumbing
    // -----------------------------------------------------------------------

    fn start_attempt(&self, state: &mut ManagerState, options: InitOptions) -> PendingInit {
        state.generation += 1;
        state.init = InitializationState::Initializing;
        state.last_error = None;
        let generation = state.generation;
        info!(generation, "starting initialization");

        let inner = Arc::clone(&self.inner);
        let attempt = async move { inner.run_attempt(options, generation).await }
            .boxed()
            .shared();
        state.pending = Some(attempt.clone());
        attempt
    }
}

impl<I: IdpClient> Inner<I> {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_attempt(
        &self,
        mut options: InitOptions,
        generation: u64,
    ) -> Result<bool, SessionError> {
        self.sanitizer.sanitize();
        let captured = self.sanitizer.take_captured();

        if let Some(response) = captured.as_ref() {
            if response.is_error() {
                let detail = response
                    .error_description()
                    .or(response.error())
                    .unwrap_or_default()
                    .to_string();
                return Ok(self.recover_from_mismatch(generation, detail));
            }
            if response.signals_challenge_method() {
                let method = response
                    .get(RedirectArtifact::CodeChallengeMethod)
                    .unwrap_or_default();
                let detail = format!("unexpected code_challenge_method={method} in address");
                return Ok(self.recover_from_mismatch(generation, detail));
            }
        }

        let replay = captured.is_some();
        options.callback = captured;

        let timeout = self.config.init_timeout;
        let outcome = match tokio::time::timeout(timeout, self.init_with_retry(&options, generation)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(generation, after_ms, "initialization timed out");
                let err = SessionError::InitializationTimeout { after_ms };
                self.fail(generation, err.clone());
                return Err(err);
            }
        };

        let authenticated = match outcome {
            Ok(authenticated) => authenticated,
            Err(IdpError::ProtocolMismatch(detail)) => {
                return Ok(self.recover_from_mismatch(generation, detail));
            }
            Err(e) => {
                let err = SessionError::from(e);
                warn!(generation, error = %err, "initialization failed");
                self.fail(generation, err.clone());
                return Err(err);
            }
        };

        let session = if authenticated {
            match self.materialize() {
                Ok(session) => Some(Arc::new(session)),
                Err(err) => {
                    warn!(generation, error = %err, "provider returned an unusable session");
                    self.fail(generation, err.clone());
                    return Err(err);
                }
            }
        } else {
            None
        };

        if !self.finish(generation, session) {
            return Ok(false);
        }
        info!(generation, authenticated, replay, "initialization complete");

        if replay && authenticated {
            self.registry.purge();
            if self.sanitizer.location().path().as_deref() == Some("/") {
                self.navigate(&self.config.post_login_path);
            }
        }
        Ok(authenticated)
    }

    async fn init_with_retry(&self, options: &InitOptions, generation: u64) -> Result<bool, IdpError> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            match self.idp.init(options).await {
                Err(IdpError::Network(detail)) if attempt < policy.max_attempts => {
                    let backoff = policy.backoff_for(attempt);
                    warn!(
                        generation,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "identity provider unreachable, retrying"
                    );
                    debug!(%detail, "network failure detail");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Throws away a bad authorization response and restarts login.
    /// Always yields `false`: there is no session afterwards.
    fn recover_from_mismatch(&self, generation: u64, detail: String) -> bool {
        warn!(generation, "authorization response rejected, restarting login");
        debug!(%detail, "protocol mismatch detail");

        self.registry.purge();
        self.idp.clear_token();

        let current = {
            let mut state = self.lock_state();
            let current = state.generation == generation;
            if current {
                state.init = InitializationState::Failed(FailureReason::ProtocolMismatch);
                state.session = None;
                state.pending = None;
                state.last_error = Some(SessionError::ProtocolMismatch { detail });
            }
            current
        };

        if current {
            self.navigate(&self.config.login_path);
        } else {
            debug!(generation, "superseded attempt, not navigating");
        }
        false
    }

    fn fail(&self, generation: u64, err: SessionError) {
        let mut state = self.lock_state();
        if state.generation != generation {
            debug!(generation, "discarding failure of superseded attempt");
            return;
        }
        let reason = err.failure_reason().unwrap_or(FailureReason::ProviderRejected);
        state.init = InitializationState::Failed(reason);
        state.session = None;
        state.pending = None;
        state.last_error = Some(err);
    }

    /// Writes a successful outcome. Returns `false` if the attempt was
    /// superseded and nothing was written.
    fn finish(&self, generation: u64, session: Option<Arc<Session>>) -> bool {
        let mut state = self.lock_state();
        if state.generation != generation {
            debug!(generation, current = state.generation, "discarding result of superseded attempt");
            return false;
        }
        state.init = InitializationState::Ready;
        if session.is_some() {
            state.forced_login = false;
        }
        state.session = session;
        state.pending = None;
        true
    }

    fn materialize(&self) -> Result<Session, SessionError> {
        let token = self.idp.token().ok_or_else(|| SessionError::MalformedSession {
            detail: "provider reported success without a token".into(),
        })?;
        let claims = match self.idp.claims() {
            Some(claims) => claims,
            None => CompactJwt
                .decode_claims(&token)
                .map_err(|e| SessionError::MalformedSession { detail: e.to_string() })?,
        };
        Session::new(token, claims).map_err(|e| SessionError::MalformedSession { detail: e.to_string() })
    }

    fn navigate(&self, target: &str) {
        if let Err(e) = self.sanitizer.location().assign(target) {
            warn!(%target, error = %e, "navigation failed");
        }
    }

    fn absolute(&self, path: &str) -> String {
        match self.sanitizer.location().origin() {
            Some(origin) => format!("{origin}{path}"),
            None => path.to_string(),
        }
    }
}

/// 128 random bits as 32 lowercase hex characters.
fn random_hex() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
