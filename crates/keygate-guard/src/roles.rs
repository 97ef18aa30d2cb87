//! Role extraction from token claims.

use keygate_protocol::{Identity, RoleSet, Session};

/// Reads roles for one client out of a session's claims.
///
/// Client roles live at `resource_access.<client_id>.roles`, realm roles
/// at `realm_access.roles`. Missing or malformed claims produce an empty
/// set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleResolver {
    client_id: String,
}

impl RoleResolver {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Roles granted on this resolver's client.
    pub fn client_roles(&self, session: &Session) -> RoleSet {
        session
            .claims
            .string_set(&["resource_access", self.client_id.as_str(), "roles"])
    }

    /// Realm-wide roles. For display only.
    pub fn realm_roles(&self, session: &Session) -> RoleSet {
        session.claims.string_set(&["realm_access", "roles"])
    }

    /// Whether the session holds `role` on this client. Realm roles with
    /// the same name don't count.
    pub fn has_role(&self, session: &Session, role: &str) -> bool {
        self.client_roles(session).contains(role)
    }

    /// The display view of the signed-in user.
    pub fn identity(&self, session: &Session) -> Identity {
        let claims = &session.claims;
        let text = |name: &str| claims.str_claim(name).map(str::to_string);
        Identity {
            username: text("preferred_username"),
            given_name: text("given_name"),
            family_name: text("family_name"),
            email: text("email"),
            client_roles: self.client_roles(session),
            realm_roles: self.realm_roles(session),
        }
    }
}
