//! Address abstraction and redirect sanitization for Keygate.
//!
//! When an identity provider sends the user back to the application it puts
//! the authorization response in the address (`#state=...&code=...`, or
//! `?error=...`). Left there, those values get replayed on reload, copied
//! into bookmarks and shared links, and written to history. This crate
//! removes them exactly once and hands them to whoever asked.
//!
//! - [`Location`]: the address bar as a trait, so the sanitizer never talks
//!   to a real browser directly.
//! - [`RedirectSanitizer`]: strips [`RedirectArtifact`] keys and captures
//!   them as an [`AuthorizationResponse`].
//!
//! # Feature Flags
//!
//! - `memory` (default): [`MemoryLocation`], an in-process address with a
//!   recorded history, used by tests and the demo portal.

mod artifact;
mod error;
#[cfg(feature = "memory")]
mod memory;
mod sanitizer;

pub use artifact::{AuthorizationResponse, RedirectArtifact};
pub use error::LocationError;
#[cfg(feature = "memory")]
pub use memory::MemoryLocation;
pub use sanitizer::RedirectSanitizer;

/// The current address and the two ways of changing it.
///
/// Implementations must be cheap to call and must not block: the session
/// layer calls these from async code while holding no locks.
pub trait Location: Send + Sync + 'static {
    /// The full current address, e.g. `http://localhost:3000/dashboard#state=x`.
    fn href(&self) -> String;

    /// Rewrites the current history entry to `target` without navigating.
    ///
    /// `target` may be absolute or relative to the current address.
    fn replace_state(&self, target: &str) -> Result<(), LocationError>;

    /// Navigates to `target`, pushing a new history entry.
    fn assign(&self, target: &str) -> Result<(), LocationError>;

    /// Scheme, host and port of the current address, without a trailing
    /// slash. `None` if the address can't be parsed.
    fn origin(&self) -> Option<String> {
        let url = url::Url::parse(&self.href()).ok()?;
        Some(url.origin().ascii_serialization())
    }

    /// Path component of the current address.
    fn path(&self) -> Option<String> {
        let url = url::Url::parse(&self.href()).ok()?;
        Some(url.path().to_string())
    }
}
