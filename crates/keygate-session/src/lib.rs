//! Session lifecycle for Keygate.
//!
//! This crate owns the answer to "is someone signed in, and with what
//! token?":
//!
//! 1. **Identity provider seam**: the [`IdpClient`] trait stands in for the
//!    provider's client library (init, login, logout, token renewal, events).
//! 2. **Lifecycle**: [`SessionManager`] runs initialization exactly once per
//!    attempt, however many callers ask, and owns the live [`Session`].
//! 3. **Bookkeeping**: [`ArtifactRegistry`] records every storage key the
//!    manager writes so logout and recovery can remove exactly those.
//!
//! # How it fits in the stack
//!
//! ```text
//! Token / Guard layers (above)  ← read session snapshots, ask for renewal
//!     ↕
//! Session Layer (this crate)    ← initialize, login, logout, recovery
//!     ↕
//! Redirect + Protocol (below)   ← address sanitization, Session and Claims
//! ```
//!
//! [`Session`]: keygate_protocol::Session

#![allow(async_fn_in_trait)]

mod error;
mod idp;
mod manager;
#[cfg(feature = "memory")]
mod memory;
mod session;
mod storage;

pub use error::SessionError;
pub use idp::{IdpClient, IdpError, IdpEvent, InitOptions, LoginOptions, LogoutOptions, OnLoad, PkceMethod};
pub use manager::SessionManager;
#[cfg(feature = "memory")]
pub use memory::{CallCounts, MemoryIdp, MemoryUser};
pub use session::{FailureReason, InitializationState, RetryPolicy, SessionConfig, SessionSnapshot};
#[cfg(feature = "memory")]
pub use storage::MemoryStorage;
pub use storage::{ArtifactRegistry, Storage, StorageError};
