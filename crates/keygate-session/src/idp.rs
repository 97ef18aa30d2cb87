//! The identity provider seam.
//!
//! Keygate doesn't speak OIDC itself. Code exchange, signature checks and
//! the silent-check iframe all belong to the provider's client library.
//! [`IdpClient`] is the minimal surface the session layer needs from that
//! library. A real application adapts its provider SDK to this trait. Tests
//! and the demo use [`MemoryIdp`](crate::MemoryIdp).

use std::future::Future;

use keygate_protocol::Claims;
use keygate_redirect::AuthorizationResponse;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What `init` should do when there's no authorization response to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnLoad {
    /// Ask the provider quietly whether an SSO session exists. Never shows
    /// a login page.
    #[default]
    CheckSso,
    /// Redirect to the login page if there's no session.
    LoginRequired,
}

/// Proof-key method for the authorization-code flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceMethod {
    S256,
}

/// Options for [`IdpClient::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub on_load: OnLoad,
    /// `Some(S256)` unless explicitly disabled.
    pub pkce_method: Option<PkceMethod>,
    /// The polling login-status iframe. Off: it breaks under third-party
    /// cookie blocking and the session layer doesn't need it.
    pub check_login_iframe: bool,
    /// An authorization response captured from the address, to be replayed
    /// instead of a silent check. Filled in by the session manager.
    pub callback: Option<AuthorizationResponse>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            on_load: OnLoad::CheckSso,
            pkce_method: Some(PkceMethod::S256),
            check_login_iframe: false,
            callback: None,
        }
    }
}

/// Options for [`IdpClient::login`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOptions {
    /// Where the provider sends the user back to. The session manager always
    /// fills this in before calling the client.
    pub redirect_uri: Option<String>,
}

/// Options for [`IdpClient::logout`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutOptions {
    pub redirect_uri: Option<String>,
}

// ---------------------------------------------------------------------------
// Events and errors
// ---------------------------------------------------------------------------

/// Notifications the provider client emits on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdpEvent {
    /// A session was established or renewed.
    AuthSuccess,
    /// Something went wrong inside the client library.
    AuthError { detail: String },
    /// The access token just expired.
    TokenExpired,
}

/// Errors reported by an [`IdpClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdpError {
    /// The authorization response doesn't match what the client expected
    /// (wrong `state`, provider-reported `error`, stale code).
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// The provider couldn't be reached.
    #[error("network failure: {0}")]
    Network(String),

    /// The provider answered and said no.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The operation requires a token the client doesn't have.
    #[error("not authenticated")]
    NotAuthenticated,
}

// ---------------------------------------------------------------------------
// IdpClient
// ---------------------------------------------------------------------------

/// Everything the session layer asks of an identity provider client.
///
/// The async methods return `impl Future + Send` so the session manager can
/// drive them from a shared, spawned-anywhere future.
pub trait IdpClient: Send + Sync + 'static {
    /// Establishes the client. Resolves `true` when a session exists
    /// afterwards, either from replaying `options.callback` or from a
    /// silent check.
    fn init(&self, options: &InitOptions) -> impl Future<Output = Result<bool, IdpError>> + Send;

    /// Starts an interactive login. Usually navigates away.
    fn login(&self, options: &LoginOptions) -> impl Future<Output = Result<(), IdpError>> + Send;

    /// Ends the provider session.
    fn logout(&self, options: &LogoutOptions)
    -> impl Future<Output = Result<(), IdpError>> + Send;

    /// Renews the token if it expires within `min_validity_seconds`.
    /// Resolves `true` if a new token was obtained.
    fn update_token(
        &self,
        min_validity_seconds: i64,
    ) -> impl Future<Output = Result<bool, IdpError>> + Send;

    /// Whether the token expires within `min_validity_seconds`.
    fn is_token_expired(&self, min_validity_seconds: i64) -> bool;

    /// The current raw token.
    fn token(&self) -> Option<String>;

    /// The current token's parsed claims.
    fn claims(&self) -> Option<Claims>;

    /// Forgets the current token without contacting the provider.
    fn clear_token(&self);

    /// A fresh receiver for the client's events.
    fn subscribe(&self) -> broadcast::Receiver<IdpEvent>;
}
