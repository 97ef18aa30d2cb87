//! Access decisions.
//!
//! ```text
//!   requirement      no session            session, role missing    otherwise
//!   ───────────      ──────────            ─────────────────────    ─────────
//!   None             Allow                 Allow                    Allow
//!   Authenticated    RedirectTo(Login)     n/a                      Allow
//!   Role(r)          RedirectTo(Login)     RedirectTo(Fallback)     Allow
//! ```
//!
//! The initialization state is not consulted: a guard evaluated before the
//! provider answers simply sees no session. Callers that want a loading
//! screen check [`SessionSnapshot::state`] themselves.

use keygate_session::SessionSnapshot;
use serde::{Deserialize, Serialize};

use crate::RoleResolver;

/// What a route asks of the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    None,
    Authenticated,
    /// A client role, matched exactly.
    Role(String),
}

/// Where a denied navigation should go instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// The login entry point.
    Login,
    /// The page for signed-in users who lack a role.
    Fallback,
    /// A fixed path (route aliases such as `/` → `/dashboard`).
    Path(String),
}

/// The guard's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectTo(Redirect),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Paths for [`Redirect::Login`] and [`Redirect::Fallback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Default: `/login`.
    pub login_path: String,
    /// Default: `/dashboard`.
    pub fallback_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            fallback_path: "/dashboard".to_string(),
        }
    }
}

/// Decides whether a navigation may proceed.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    resolver: RoleResolver,
    config: GuardConfig,
}

impl RouteGuard {
    pub fn new(resolver: RoleResolver, config: GuardConfig) -> Self {
        Self { resolver, config }
    }

    pub fn decide(&self, snapshot: &SessionSnapshot, requirement: &Requirement) -> Decision {
        let decision = match (requirement, snapshot.session.as_deref()) {
            (Requirement::None, _) => Decision::Allow,
            (Requirement::Authenticated | Requirement::Role(_), None) => {
                Decision::RedirectTo(Redirect::Login)
            }
            (Requirement::Role(role), Some(session)) if !self.resolver.has_role(session, role) => {
                Decision::RedirectTo(Redirect::Fallback)
            }
            (Requirement::Authenticated | Requirement::Role(_), Some(_)) => Decision::Allow,
        };
        if !decision.is_allowed() {
            tracing::debug!(?requirement, ?decision, "navigation redirected");
        }
        decision
    }

    /// The concrete path a redirect points at.
    pub fn path_for<'a>(&'a self, redirect: &'a Redirect) -> &'a str {
        match redirect {
            Redirect::Login => &self.config.login_path,
            Redirect::Fallback => &self.config.fallback_path,
            Redirect::Path(path) => path,
        }
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}
