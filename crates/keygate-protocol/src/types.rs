//! Core session types.
//!
//! A [`Session`] is the application's record of "someone is signed in":
//! the raw bearer token, the claims parsed out of it, and when it stops
//! being valid. [`Identity`] is a friendlier, derived view of the same
//! claims for display.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// RoleSet
// ---------------------------------------------------------------------------

/// An insertion-ordered set of role names.
///
/// Roles arrive as JSON arrays, and the order the IdP lists them in is the
/// order a profile page shows them in, so this keeps a `Vec` and skips
/// duplicates on insert rather than using a `HashSet`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(Vec<String>);

impl RoleSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a role. Returns `false` if it was already present.
    pub fn insert(&mut self, role: impl Into<String>) -> bool {
        let role = role.into();
        if self.contains(&role) {
            return false;
        }
        self.0.push(role);
        true
    }

    /// Returns `true` if `role` is in the set (exact, case-sensitive match).
    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|r| r == role)
    }

    /// Iterates roles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of distinct roles.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no roles.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The roles as a slice, in insertion order.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for RoleSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = RoleSet::new();
        for role in iter {
            set.insert(role);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// The parsed payload of an access token.
///
/// Claims are kept as a JSON object rather than a fixed struct: identity
/// providers add their own claims freely (`resource_access`,
/// `realm_access`, protocol-mapper output) and the session layer should not
/// drop what it doesn't know about. Typed accessors cover the claims Keygate
/// actually reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Creates an empty claim set.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert, handy for constructing tokens in tests.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Inserts or replaces a claim.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Raw access to a top-level claim.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// A top-level claim as a string, if it is one.
    pub fn str_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// A top-level claim as an integer.
    ///
    /// Some providers emit NumericDate values as floats (`1700000000.0`),
    /// so floats are accepted and truncated.
    pub fn i64_claim(&self, name: &str) -> Option<i64> {
        let value = self.0.get(name)?;
        value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
    }

    /// The `exp` claim: when the token stops being valid, in epoch seconds.
    pub fn expires_at(&self) -> Option<i64> {
        self.i64_claim("exp")
    }

    /// Walks nested objects: `lookup(&["resource_access", "app", "roles"])`.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }

    /// Collects a nested array of strings into a [`RoleSet`].
    ///
    /// Missing paths, non-arrays and non-string entries all yield an empty
    /// (or partial) set instead of an error. A token without roles is a
    /// perfectly normal token.
    pub fn string_set(&self, path: &[&str]) -> RoleSet {
        self.lookup(path)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live, authenticated session.
///
/// Sessions are immutable values. When a token is renewed the session
/// manager builds a whole new `Session` and swaps it in, so a reader holding
/// an older snapshot never sees a half-updated one.
#[derive(Clone, PartialEq)]
pub struct Session {
    /// The bearer token exactly as the IdP issued it.
    pub raw_token: String,

    /// Claims parsed from the token.
    pub claims: Claims,

    /// When the token expires, in Unix epoch seconds (the `exp` claim).
    pub expiry_epoch_seconds: i64,
}

impl Session {
    /// Builds a session from a token and its parsed claims.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MissingClaim`] if the claims carry no
    /// usable `exp`. A token that never expires is not something this
    /// layer will accept.
    pub fn new(raw_token: impl Into<String>, claims: Claims) -> Result<Self, ProtocolError> {
        let expiry_epoch_seconds = claims.expires_at().ok_or(ProtocolError::MissingClaim("exp"))?;
        Ok(Self {
            raw_token: raw_token.into(),
            claims,
            expiry_epoch_seconds,
        })
    }

    /// Seconds left before expiry, relative to `now`. Negative once expired.
    pub fn seconds_remaining(&self, now_epoch_seconds: i64) -> i64 {
        self.expiry_epoch_seconds - now_epoch_seconds
    }
}

/// Hand-written so that printing a session (in a log line, a panic message,
/// a test failure) never prints the bearer token.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("raw_token", &"<redacted>")
            .field("subject", &self.claims.str_claim("sub"))
            .field("expiry_epoch_seconds", &self.expiry_epoch_seconds)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Who the signed-in user is, in display terms.
///
/// Derived from [`Session::claims`] on demand and never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// `preferred_username`.
    pub username: Option<String>,
    /// `given_name`.
    pub given_name: Option<String>,
    /// `family_name`.
    pub family_name: Option<String>,
    /// `email`.
    pub email: Option<String>,
    /// Roles granted on this application's client. These drive access.
    pub client_roles: RoleSet,
    /// Realm-wide roles. Shown to the user, never checked.
    pub realm_roles: RoleSet,
}

impl Identity {
    /// `"Given Family"`, trimmed, or `"User"` when neither name is known.
    pub fn full_name(&self) -> String {
        let given = self.given_name.as_deref().unwrap_or("");
        let family = self.family_name.as_deref().unwrap_or("");
        let full = format!("{given} {family}");
        let full = full.trim();
        if full.is_empty() {
            "User".to_string()
        } else {
            full.to_string()
        }
    }

    /// The username, falling back to `"User"`.
    pub fn display_username(&self) -> &str {
        self.username.as_deref().unwrap_or("User")
    }

    /// Up to two uppercase initials for an avatar.
    ///
    /// Both names present → first letter of each. Otherwise the first letter
    /// of the username. Otherwise `"U"`.
    pub fn initials(&self) -> String {
        let first = |s: &Option<String>| s.as_deref().and_then(|s| s.chars().next());
        match (first(&self.given_name), first(&self.family_name)) {
            (Some(g), Some(f)) => format!("{g}{f}").to_uppercase(),
            _ => first(&self.username)
                .map(|c| c.to_uppercase().to_string())
                .unwrap_or_else(|| "U".to_string()),
        }
    }
}
