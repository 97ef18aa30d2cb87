/// Errors from a [`Location`](crate::Location) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// The current or target address couldn't be parsed.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The host refused the history change (cross-origin target, for
    /// instance).
    #[error("history update rejected: {0}")]
    Rejected(String),
}
