//! Error types for the session layer.
//!
//! Display strings are generic and safe to show a user. Whatever the
//! identity provider actually said lives in a `detail`
//! field and is reachable through [`SessionError::detail`].

use crate::FailureReason;

/// Errors surfaced by session operations.
///
/// `Clone` because a single initialization result is shared by every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The identity provider didn't answer within the configured timeout.
    #[error("sign-in check timed out after {after_ms} ms")]
    InitializationTimeout { after_ms: u64 },

    /// The address carried an authorization response the provider (or the
    /// client library) refused to accept.
    #[error("the sign-in response could not be processed")]
    ProtocolMismatch { detail: String },

    /// The identity provider couldn't be reached.
    #[error("the sign-in service is unreachable")]
    NetworkFailure { detail: String },

    /// The identity provider answered with a refusal.
    #[error("the sign-in service rejected the request")]
    ProviderRejected { detail: String },

    /// Renewing the access token failed.
    #[error("the session could not be renewed")]
    RefreshFailure { detail: String },

    /// The operation needs a session and there isn't one.
    #[error("not signed in")]
    Unauthenticated,

    /// A session exists but lacks the required client role.
    #[error("missing required role {role:?}")]
    Unauthorized { role: String },

    /// The provider reported success but the token is unusable (no `exp`,
    /// undecodable payload, missing entirely).
    #[error("the session token is unusable")]
    MalformedSession { detail: String },
}

impl SessionError {
    /// The provider-facing detail behind this error, if any.
    ///
    /// Keep this out of user-visible text. It may contain whatever the
    /// provider chose to put in `error_description`.
    pub fn detail(&self) -> Option<&str> {
        match self {
            SessionError::ProtocolMismatch { detail }
            | SessionError::NetworkFailure { detail }
            | SessionError::ProviderRejected { detail }
            | SessionError::RefreshFailure { detail }
            | SessionError::MalformedSession { detail } => Some(detail),
            SessionError::InitializationTimeout { .. }
            | SessionError::Unauthenticated
            | SessionError::Unauthorized { .. } => None,
        }
    }

    /// Which [`FailureReason`] an initialization ending in this error
    /// records. `None` for errors initialization never produces.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            SessionError::InitializationTimeout { .. } => Some(FailureReason::TimedOut),
            SessionError::ProtocolMismatch { .. } => Some(FailureReason::ProtocolMismatch),
            SessionError::NetworkFailure { .. } => Some(FailureReason::NetworkFailure),
            SessionError::ProviderRejected { .. } | SessionError::Unauthenticated => {
                Some(FailureReason::ProviderRejected)
            }
            SessionError::MalformedSession { .. } => Some(FailureReason::MalformedSession),
            SessionError::RefreshFailure { .. } | SessionError::Unauthorized { .. } => None,
        }
    }
}

impl From<crate::IdpError> for SessionError {
    fn from(err: crate::IdpError) -> Self {
        use crate::IdpError;
        match err {
            IdpError::ProtocolMismatch(detail) => SessionError::ProtocolMismatch { detail },
            IdpError::Network(detail) => SessionError::NetworkFailure { detail },
            IdpError::Rejected(detail) => SessionError::ProviderRejected { detail },
            IdpError::NotAuthenticated => SessionError::Unauthenticated,
        }
    }
}
