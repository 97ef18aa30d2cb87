//! # Keygate
//!
//! Session management for applications that sign users in through an
//! OpenID Connect identity provider.
//!
//! [`AuthContext`] is the single entry point. It owns the session from the
//! first page load onward and answers "may this user open this page?".
//! [`ApiClient`] carries its token to the backend.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use keygate::prelude::*;
//!
//! # async fn run() -> Result<(), KeygateError> {
//! let location = Arc::new(MemoryLocation::new("http://localhost:3000/")?);
//! let idp = MemoryIdp::new().with_location(location.clone());
//! let auth = AuthContext::builder(idp)
//!     .location(location)
//!     .config(KeygateConfig::from_env()?)
//!     .build()?;
//!
//! if !auth.initialize().await? {
//!     auth.login().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `http` (default): [`ApiClient`], the bearer-token request layer.
//! - `memory` (default): in-memory provider, address and storage.

#[cfg(feature = "http")]
mod api;
mod config;
mod context;
mod error;
pub mod logging;

#[cfg(feature = "http")]
pub use api::{ApiClient, Document};
pub use config::KeygateConfig;
pub use context::{AuthContext, AuthContextBuilder};
#[cfg(feature = "http")]
pub use error::ApiError;
pub use error::{ConfigError, KeygateError};

pub use keygate_guard as guard;
pub use keygate_protocol as protocol;
pub use keygate_redirect as redirect;
pub use keygate_session as session;
pub use keygate_token as token;

pub mod prelude {
    #[cfg(feature = "http")]
    pub use crate::{ApiClient, ApiError, Document};
    pub use crate::{AuthContext, ConfigError, KeygateConfig, KeygateError};

    pub use keygate_guard::{Decision, Redirect, Requirement, RouteTable};
    pub use keygate_protocol::{Clock, Identity, ManualClock, RoleSet, Session, SystemClock};
    pub use keygate_redirect::Location;
    pub use keygate_session::{IdpClient, IdpEvent, InitializationState, SessionError, Storage};
    pub use keygate_token::{RefreshOutcome, TokenConfig};

    #[cfg(feature = "memory")]
    pub use keygate_redirect::MemoryLocation;
    #[cfg(feature = "memory")]
    pub use keygate_session::{MemoryIdp, MemoryStorage, MemoryUser};
}
