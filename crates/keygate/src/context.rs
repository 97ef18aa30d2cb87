//! `AuthContext`: the one object the rest of the application talks to.
//!
//! It ties the layers together: redirect → session → token → guard.
//! Construct it once at startup and pass it (or an `Arc` of it) to whatever
//! needs to know who is signed in.

use std::sync::{Arc, Mutex, PoisonError};

use keygate_guard::{Decision, RoleResolver, RouteGuard, RouteTable};
use keygate_protocol::{Clock, Identity, RoleSet, SystemClock};
use keygate_redirect::{Location, RedirectSanitizer};
use keygate_session::{
    IdpClient, InitOptions, InitializationState, LoginOptions, LogoutOptions, SessionError,
    SessionManager, Storage,
};
use keygate_token::{TokenConfig, TokenLifecycle};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{ConfigError, KeygateConfig, KeygateError};

/// Builder for an [`AuthContext`].
///
/// # Example
///
/// ```rust,ignore
/// let auth = AuthContext::builder(idp)
///     .location(location)
///     .storage(storage)
///     .config(KeygateConfig::from_env()?)
///     .build()?;
/// auth.initialize().await?;
/// ```
pub struct AuthContextBuilder<I: IdpClient> {
    idp: I,
    location: Option<Arc<dyn Location>>,
    storage: Option<Arc<dyn Storage>>,
    clock: Arc<dyn Clock>,
    config: KeygateConfig,
    token_config: Option<TokenConfig>,
    routes: RouteTable,
}

impl<I: IdpClient> AuthContextBuilder<I> {
    pub fn new(idp: I) -> Self {
        Self {
            idp,
            location: None,
            storage: None,
            clock: Arc::new(SystemClock),
            config: KeygateConfig::default(),
            token_config: None,
            routes: RouteTable::portal(),
        }
    }

    /// The address the context reads and rewrites. Required.
    pub fn location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    /// Where login bookkeeping is written. Defaults to in-memory storage
    /// when the `memory` feature is on, otherwise required.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The clock expiry checks use. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: KeygateConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the renewal thresholds derived from the config.
    pub fn token_config(mut self, config: TokenConfig) -> Self {
        self.token_config = Some(config);
        self
    }

    /// The routes [`AuthContext::decide`] evaluates. Defaults to
    /// [`RouteTable::portal`].
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Assembles the context and strips any redirect artifacts from the
    /// address right away. What was stripped is kept for
    /// [`AuthContext::initialize`].
    ///
    /// # Errors
    /// [`ConfigError::Missing`] when no location (or, without the `memory`
    /// feature, no storage) was given.
    pub fn build(self) -> Result<AuthContext<I>, KeygateError> {
        let location = self.location.ok_or(ConfigError::Missing("location"))?;
        let storage = match self.storage {
            Some(storage) => storage,
            None => default_storage()?,
        };
        let config = self.config.validated();

        let sanitizer = Arc::new(RedirectSanitizer::new(location));
        if sanitizer.sanitize() {
            debug!("captured an authorization response at startup");
        }

        let manager = SessionManager::new(self.idp, sanitizer, storage, config.session_config());
        let token_config = self.token_config.unwrap_or_else(|| config.token_config());
        let lifecycle = TokenLifecycle::new(manager.clone(), self.clock, token_config);
        let guard = RouteGuard::new(RoleResolver::new(config.client_id.clone()), config.guard_config());

        info!(realm = %config.realm, client_id = %config.client_id, "auth context ready");
        Ok(AuthContext {
            config,
            manager,
            lifecycle,
            guard,
            routes: self.routes,
            pump: Mutex::new(None),
        })
    }
}

#[cfg(feature = "memory")]
fn default_storage() -> Result<Arc<dyn Storage>, ConfigError> {
    Ok(Arc::new(keygate_session::MemoryStorage::new()))
}

#[cfg(not(feature = "memory"))]
fn default_storage() -> Result<Arc<dyn Storage>, ConfigError> {
    Err(ConfigError::Missing("storage"))
}

/// Session state and user details for the presentation layer.
///
/// Every query reads the current snapshot. Nothing is cached here, so a
/// renewal or logout is visible immediately.
pub struct AuthContext<I: IdpClient> {
    config: KeygateConfig,
    manager: SessionManager<I>,
    lifecycle: TokenLifecycle<I>,
    guard: RouteGuard,
    routes: RouteTable,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<I: IdpClient> AuthContext<I> {
    pub fn builder(idp: I) -> AuthContextBuilder<I> {
        AuthContextBuilder::new(idp)
    }

    /// Starts (or joins) session initialization and makes sure provider
    /// events are being watched.
    pub async fn initialize(&self) -> Result<bool, SessionError> {
        self.ensure_event_pump();
        self.manager.initialize(InitOptions::default()).await
    }

    pub async fn login(&self) -> Result<(), SessionError> {
        self.manager.login(LoginOptions::default()).await
    }

    pub async fn logout(&self) {
        self.manager.logout(LogoutOptions::default()).await;
    }

    pub fn is_logged_in(&self) -> bool {
        self.manager.is_logged_in()
    }

    /// `true` once the provider has answered, whether or not anyone is
    /// signed in.
    pub fn is_initialized(&self) -> bool {
        self.manager.is_initialized()
    }

    pub fn state(&self) -> InitializationState {
        self.manager.state()
    }

    pub fn token(&self) -> Option<String> {
        self.manager.token()
    }

    pub fn identity(&self) -> Option<Identity> {
        let session = self.manager.session()?;
        Some(self.guard.resolver().identity(&session))
    }

    pub fn username(&self) -> Option<String> {
        self.identity().and_then(|identity| identity.username)
    }

    /// Display name, `"User"` when unknown or signed out.
    pub fn full_name(&self) -> String {
        self.identity().unwrap_or_default().full_name()
    }

    /// Client roles of the signed-in user. Empty when signed out.
    pub fn user_roles(&self) -> RoleSet {
        self.manager
            .session()
            .map(|session| self.guard.resolver().client_roles(&session))
            .unwrap_or_default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.manager
            .session()
            .is_some_and(|session| self.guard.resolver().has_role(&session, role))
    }

    /// Whether navigating to `path` may proceed.
    pub fn decide(&self, path: &str) -> Decision {
        self.routes.decide(&self.guard, &self.manager.snapshot(), path)
    }

    /// Where a redirect decision points. `None` for [`Decision::Allow`].
    pub fn redirect_target<'a>(&'a self, decision: &'a Decision) -> Option<&'a str> {
        match decision {
            Decision::Allow => None,
            Decision::RedirectTo(redirect) => Some(self.guard.path_for(redirect)),
        }
    }

    /// The generic error that ended the last initialization, if any.
    pub fn last_error(&self) -> Option<SessionError> {
        self.manager.last_failure()
    }

    /// Raw provider text behind [`last_error`](Self::last_error). Always
    /// `None` unless `debug` is set in the config.
    pub fn error_detail(&self) -> Option<String> {
        if !self.config.debug {
            return None;
        }
        self.manager
            .last_failure()
            .and_then(|err| err.detail().map(str::to_string))
    }

    /// A request client for the configured backend.
    #[cfg(feature = "http")]
    pub fn api_client(&self) -> Result<crate::ApiClient<I>, ConfigError> {
        crate::ApiClient::new(&self.config.backend_url, self.lifecycle.clone())
    }

    pub fn config(&self) -> &KeygateConfig {
        &self.config
    }

    pub fn manager(&self) -> &SessionManager<I> {
        &self.manager
    }

    pub fn lifecycle(&self) -> &TokenLifecycle<I> {
        &self.lifecycle
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    fn ensure_event_pump(&self) {
        let mut pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner);
        let running = pump.as_ref().is_some_and(|handle| !handle.is_finished());
        if !running {
            debug!("starting provider event pump");
            *pump = Some(self.lifecycle.watch_events());
        }
    }
}

impl<I: IdpClient> Drop for AuthContext<I> {
    fn drop(&mut self) {
        let pump = self.pump.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pump.take() {
            handle.abort();
        }
    }
}
