//! Unified error type for the Keygate stack.

use keygate_protocol::ProtocolError;
use keygate_redirect::LocationError;
use keygate_session::{SessionError, StorageError};

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` conversions let `?` lift a sub-crate error straight into
/// this type.
#[derive(Debug, thiserror::Error)]
pub enum KeygateError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[cfg(feature = "http")]
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Configuration that can't be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required value was left empty, or a required component wasn't given
    /// to a builder.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A value couldn't be parsed.
    #[error("invalid value {value:?} for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the backend request layer.
#[cfg(feature = "http")]
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport failure, or a non-success status from a typed helper.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The token needed renewal and renewal failed. Login has been restarted.
    #[error("session could not be renewed before the request")]
    RenewalFailed(#[source] SessionError),

    /// The backend answered 401. Login has been restarted.
    #[error("the backend rejected the session")]
    SessionInvalid,

    /// The request path doesn't resolve against the backend URL.
    #[error("invalid request path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
}
