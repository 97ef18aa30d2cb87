//! Shared data types for Keygate.
//!
//! This crate defines the values every other layer passes around:
//!
//! - **Types** ([`Session`], [`Claims`], [`Identity`], [`RoleSet`]): what a
//!   signed-in user looks like once the identity provider has vouched for
//!   them.
//! - **Codec** ([`TokenCodec`] trait, [`CompactJwt`]): how claims are read
//!   out of (and, for development, written into) a compact token string.
//! - **Clock** ([`Clock`], [`SystemClock`], [`ManualClock`]): where "now"
//!   comes from, so expiry checks can be driven deterministically.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about redirects, identity providers or
//! routing. It only knows how to represent a session.
//!
//! ```text
//! IdP client (token string) → Protocol (Session, Claims) → Guard (roles, decisions)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod clock;
mod codec;
mod error;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::TokenCodec;
#[cfg(feature = "json")]
pub use codec::CompactJwt;
pub use error::ProtocolError;
pub use types::{Claims, Identity, RoleSet, Session};
