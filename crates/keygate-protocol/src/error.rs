//! Error types for the protocol layer.
//!
//! Each crate in Keygate defines its own error enum. A `ProtocolError`
//! always means the problem is in the shape of a token or its claims, never
//! in the network or the identity provider.

/// Errors that can occur while reading or building session values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The token string doesn't have the `header.payload.signature` shape,
    /// or a segment isn't valid base64url.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Serializing claims to JSON failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The token payload isn't a JSON object.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A claim the session can't live without is absent or has the wrong
    /// type. `exp` is the usual suspect.
    #[error("missing or invalid claim: {0}")]
    MissingClaim(&'static str),
}
