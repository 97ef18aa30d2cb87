//! A scriptable in-process identity provider.
//!
//! `MemoryIdp` behaves like a provider client library talking to a provider
//! that always answers: it issues unsigned compact tokens for a configured
//! user, remembers whether an SSO session exists, and emits events on a
//! broadcast channel. Tests script failures and delays on it. The demo
//! portal uses it as its whole backend.
//!
//! Cloning a `MemoryIdp` gives another handle to the same provider, so a
//! test hands one clone to the session manager and keeps one to script.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use keygate_protocol::{Claims, Clock, CompactJwt, SystemClock, TokenCodec};
use keygate_redirect::Location;
use rand::Rng;
use tokio::sync::broadcast;

use crate::{IdpClient, IdpError, IdpEvent, InitOptions, LoginOptions, LogoutOptions};

/// The account the provider signs people in as.
#[derive(Debug, Clone)]
pub struct MemoryUser {
    /// Claims copied into every token. `exp` and `iat` are added per token.
    pub claims: Claims,
    /// How long each issued token is valid for.
    pub token_lifetime_secs: i64,
}

impl MemoryUser {
    /// A user with the claims a typical provider emits, holding `client_roles`
    /// on `client_id`.
    pub fn new(username: &str, client_id: &str, client_roles: &[&str]) -> Self {
        let claims = Claims::new()
            .with("sub", format!("{username}-id"))
            .with("preferred_username", username)
            .with(
                "resource_access",
                client_roles_claim(client_id, client_roles),
            )
            .with(
                "realm_access",
                serde_json::json!({ "roles": ["offline_access", "uma_authorization"] }),
            );
        Self {
            claims,
            token_lifetime_secs: 300,
        }
    }

    /// Adds `given_name` / `family_name`.
    #[must_use]
    pub fn named(mut self, given: &str, family: &str) -> Self {
        self.claims.insert("given_name", given);
        self.claims.insert("family_name", family);
        self
    }

    /// Adds `email`.
    #[must_use]
    pub fn with_email(mut self, email: &str) -> Self {
        self.claims.insert("email", email);
        self
    }

    /// Sets the lifetime of issued tokens.
    #[must_use]
    pub fn with_token_lifetime(mut self, secs: i64) -> Self {
        self.token_lifetime_secs = secs;
        self
    }
}

fn client_roles_claim(client_id: &str, roles: &[&str]) -> serde_json::Value {
    let mut inner = serde_json::Map::new();
    inner.insert("roles".into(), serde_json::json!(roles));
    let mut outer = serde_json::Map::new();
    outer.insert(client_id.to_string(), serde_json::Value::Object(inner));
    serde_json::Value::Object(outer)
}

/// How many times each operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub init: usize,
    pub login: usize,
    pub logout: usize,
    pub update_token: usize,
    pub clear_token: usize,
}

#[derive(Default)]
struct State {
    user: Option<MemoryUser>,
    sso_session: bool,
    token: Option<String>,
    claims: Option<Claims>,
    init_delay: Duration,
    init_script: VecDeque<IdpError>,
    refresh_failure: Option<IdpError>,
    pending_code: Option<String>,
    calls: CallCounts,
    last_init: Option<InitOptions>,
    last_login: Option<LoginOptions>,
    last_logout: Option<LogoutOptions>,
}

/// In-memory [`IdpClient`].
#[derive(Clone)]
pub struct MemoryIdp {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<IdpEvent>,
    clock: Arc<dyn Clock>,
    location: Option<Arc<dyn Location>>,
}

impl MemoryIdp {
    /// A provider with no user and no SSO session, on the system clock.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
            clock: Arc::new(SystemClock),
            location: None,
        }
    }

    /// Uses `clock` for `iat`/`exp` and expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lets `login` and `logout` navigate `location` the way a real client
    /// library would: login lands back on the redirect target with a fresh
    /// `state`/`code` fragment.
    #[must_use]
    pub fn with_location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    /// The account `login` signs in as.
    pub fn set_user(&self, user: MemoryUser) {
        self.lock().user = Some(user);
    }

    /// Pretends the user already has a provider session, so a silent check
    /// succeeds.
    pub fn set_sso_session(&self, active: bool) {
        self.lock().sso_session = active;
    }

    /// Makes each `init` take this long before answering.
    pub fn set_init_delay(&self, delay: Duration) {
        self.lock().init_delay = delay;
    }

    /// Queues an error for the next `init`. Multiple calls queue multiple
    /// failures, consumed in order.
    pub fn fail_next_init(&self, error: IdpError) {
        self.lock().init_script.push_back(error);
    }

    /// Makes every `update_token` that would renew fail with `error`, or
    /// succeed again with `None`.
    pub fn set_refresh_failure(&self, error: Option<IdpError>) {
        self.lock().refresh_failure = error;
    }

    /// Emits `event` to every current subscriber.
    pub fn fire(&self, event: IdpEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Call counters so far.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// The options passed to the most recent `init`.
    pub fn last_init(&self) -> Option<InitOptions> {
        self.lock().last_init.clone()
    }

    /// The options passed to the most recent `login`.
    pub fn last_login(&self) -> Option<LoginOptions> {
        self.lock().last_login.clone()
    }

    /// The options passed to the most recent `logout`.
    pub fn last_logout(&self) -> Option<LogoutOptions> {
        self.lock().last_logout.clone()
    }

    /// The authorization code the provider expects on the next replay.
    /// Set by `login`.
    pub fn pending_code(&self) -> Option<String> {
        self.lock().pending_code.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue_token(&self, state: &mut State) -> Result<(), IdpError> {
        let user = state.user.as_ref().ok_or(IdpError::NotAuthenticated)?;
        let now = self.clock.now_epoch_seconds();
        let claims = user
            .claims
            .clone()
            .with("iat", now)
            .with("exp", now + user.token_lifetime_secs)
            .with("jti", random_hex());
        let token = CompactJwt
            .encode_unsigned(&claims)
            .map_err(|e| IdpError::Rejected(e.to_string()))?;
        state.token = Some(token);
        state.claims = Some(claims);
        Ok(())
    }
}

impl Default for MemoryIdp {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryIdp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryIdp")
            .field("sso_session", &state.sso_session)
            .field("has_token", &state.token.is_some())
            .field("calls", &state.calls)
            .finish_non_exhaustive()
    }
}

impl IdpClient for MemoryIdp {
    async fn init(&self, options: &InitOptions) -> Result<bool, IdpError> {
        let delay = {
            let mut state = self.lock();
            state.calls.init += 1;
            state.last_init = Some(options.clone());
            state.init_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(error) = state.init_script.pop_front() {
            return Err(error);
        }

        let authenticated = match &options.callback {
            Some(response) => {
                if let Some(error) = response.error() {
                    let detail = response.error_description().unwrap_or(error);
                    return Err(IdpError::ProtocolMismatch(detail.to_string()));
                }
                let expected = state.pending_code.take();
                match (response.code(), expected) {
                    (Some(code), Some(expected)) if code == expected => {
                        state.sso_session = true;
                        self.issue_token(&mut state)?;
                        true
                    }
                    (Some(_), _) => {
                        return Err(IdpError::ProtocolMismatch(
                            "authorization code does not match a pending login".into(),
                        ));
                    }
                    (None, _) => {
                        return Err(IdpError::ProtocolMismatch("response carries no code".into()));
                    }
                }
            }
            None if state.sso_session && state.user.is_some() => {
                self.issue_token(&mut state)?;
                true
            }
            None => false,
        };
        drop(state);

        if authenticated {
            self.fire(IdpEvent::AuthSuccess);
        }
        Ok(authenticated)
    }

    async fn login(&self, options: &LoginOptions) -> Result<(), IdpError> {
        let code = random_hex();
        {
            let mut state = self.lock();
            state.calls.login += 1;
            state.last_login = Some(options.clone());
            if state.user.is_none() {
                return Err(IdpError::Rejected("no account configured".into()));
            }
            state.pending_code = Some(code.clone());
        }

        if let (Some(location), Some(target)) = (&self.location, &options.redirect_uri) {
            let back = format!(
                "{target}#state={}&session_state={}&code={code}",
                random_hex(),
                random_hex()
            );
            location
                .assign(&back)
                .map_err(|e| IdpError::Network(e.to_string()))?;
        }
        Ok(())
    }

    async fn logout(&self, options: &LogoutOptions) -> Result<(), IdpError> {
        {
            let mut state = self.lock();
            state.calls.logout += 1;
            state.last_logout = Some(options.clone());
            state.sso_session = false;
            state.token = None;
            state.claims = None;
        }
        if let (Some(location), Some(target)) = (&self.location, &options.redirect_uri) {
            location
                .assign(target)
                .map_err(|e| IdpError::Network(e.to_string()))?;
        }
        Ok(())
    }

    async fn update_token(&self, min_validity_seconds: i64) -> Result<bool, IdpError> {
        let mut state = self.lock();
        state.calls.update_token += 1;
        if state.token.is_none() {
            return Err(IdpError::NotAuthenticated);
        }
        if !expires_within(&state, self.clock.now_epoch_seconds(), min_validity_seconds) {
            return Ok(false);
        }
        if let Some(error) = state.refresh_failure.clone() {
            return Err(error);
        }
        self.issue_token(&mut state)?;
        Ok(true)
    }

    fn is_token_expired(&self, min_validity_seconds: i64) -> bool {
        let state = self.lock();
        expires_within(&state, self.clock.now_epoch_seconds(), min_validity_seconds)
    }

    fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    fn claims(&self) -> Option<Claims> {
        self.lock().claims.clone()
    }

    fn clear_token(&self) {
        let mut state = self.lock();
        state.calls.clear_token += 1;
        state.token = None;
        state.claims = None;
    }

    fn subscribe(&self) -> broadcast::Receiver<IdpEvent> {
        self.events.subscribe()
    }
}

fn expires_within(state: &State, now: i64, min_validity_seconds: i64) -> bool {
    match state.claims.as_ref().and_then(Claims::expires_at) {
        Some(exp) => now + min_validity_seconds >= exp,
        None => true,
    }
}

fn random_hex() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
