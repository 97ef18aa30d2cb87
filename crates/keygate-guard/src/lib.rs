//! Authorization views for Keygate.
//!
//! Everything here is pure: no I/O, no locks, no provider calls. Given a
//! session snapshot, these types answer "what roles does this user have?"
//! and "may they see this page?".
//!
//! - [`RoleResolver`] reads client and realm roles out of the token claims.
//! - [`RouteGuard`] turns a snapshot and a [`Requirement`] into a
//!   [`Decision`].
//! - [`RouteTable`] maps application paths to requirements.
//!
//! Only **client** roles grant access. Realm roles are extracted so a
//! profile page can show them, and are never consulted by the guard.

mod guard;
mod roles;
mod routes;

pub use guard::{Decision, GuardConfig, Redirect, Requirement, RouteGuard};
pub use roles::RoleResolver;
pub use routes::{Route, RouteTable};
