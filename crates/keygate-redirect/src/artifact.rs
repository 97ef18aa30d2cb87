//! Redirect artifacts and the captured authorization response.

use std::collections::BTreeMap;

/// An address key that marks an identity provider's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RedirectArtifact {
    Code,
    State,
    Error,
    ErrorDescription,
    SessionState,
    Iss,
    /// Never part of a valid response. Seeing it in the address means the
    /// provider and client disagree on the challenge method.
    CodeChallengeMethod,
}

impl RedirectArtifact {
    /// Every artifact key, in the order they're usually emitted.
    pub const ALL: [RedirectArtifact; 7] = [
        RedirectArtifact::State,
        RedirectArtifact::SessionState,
        RedirectArtifact::Code,
        RedirectArtifact::Error,
        RedirectArtifact::ErrorDescription,
        RedirectArtifact::Iss,
        RedirectArtifact::CodeChallengeMethod,
    ];

    /// The literal key as it appears in the address.
    pub fn as_str(self) -> &'static str {
        match self {
            RedirectArtifact::Code => "code",
            RedirectArtifact::State => "state",
            RedirectArtifact::Error => "error",
            RedirectArtifact::ErrorDescription => "error_description",
            RedirectArtifact::SessionState => "session_state",
            RedirectArtifact::Iss => "iss",
            RedirectArtifact::CodeChallengeMethod => "code_challenge_method",
        }
    }

    /// Parses an address key. Unknown keys return `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == key)
    }
}

/// The artifact values stripped from the address by one sanitization.
///
/// Only artifact keys are kept. Other query parameters are discarded along
/// with the rest of the query string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthorizationResponse {
    values: BTreeMap<RedirectArtifact, String>,
}

impl AuthorizationResponse {
    /// Creates an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, artifact: RedirectArtifact, value: impl Into<String>) -> Self {
        self.values.insert(artifact, value.into());
        self
    }

    /// Inserts or replaces one value.
    pub fn insert(&mut self, artifact: RedirectArtifact, value: impl Into<String>) {
        self.values.insert(artifact, value.into());
    }

    /// The raw value for `artifact`, if it was present.
    pub fn get(&self, artifact: RedirectArtifact) -> Option<&str> {
        self.values.get(&artifact).map(String::as_str)
    }

    /// The authorization code.
    pub fn code(&self) -> Option<&str> {
        self.get(RedirectArtifact::Code)
    }

    /// The opaque `state` the client sent with the login request.
    pub fn state(&self) -> Option<&str> {
        self.get(RedirectArtifact::State)
    }

    /// The provider's error code (`invalid_request`, `login_required`, ...).
    pub fn error(&self) -> Option<&str> {
        self.get(RedirectArtifact::Error)
    }

    /// The provider's human-readable error text.
    pub fn error_description(&self) -> Option<&str> {
        self.get(RedirectArtifact::ErrorDescription)
    }

    /// Returns `true` if the provider reported an error.
    pub fn is_error(&self) -> bool {
        self.values.contains_key(&RedirectArtifact::Error)
    }

    /// Returns `true` if the address carried `code_challenge_method`.
    pub fn signals_challenge_method(&self) -> bool {
        self.values.contains_key(&RedirectArtifact::CodeChallengeMethod)
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The keys that were present, for logging without values.
    pub fn keys(&self) -> Vec<&'static str> {
        self.values.keys().map(|a| a.as_str()).collect()
    }
}

/// Values are authorization codes and provider text. Only keys are printed.
impl std::fmt::Debug for AuthorizationResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationResponse")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_key_known_and_unknown() {
        assert_eq!(RedirectArtifact::from_key("session_state"), Some(RedirectArtifact::SessionState));
        assert_eq!(RedirectArtifact::from_key("tab"), None);
        // Case matters: providers always emit lowercase keys.
        assert_eq!(RedirectArtifact::from_key("Code"), None);
    }

    #[test]
    fn test_all_round_trips_through_from_key() {
        for artifact in RedirectArtifact::ALL {
            assert_eq!(RedirectArtifact::from_key(artifact.as_str()), Some(artifact));
        }
    }

    #[test]
    fn test_debug_hides_values() {
        let response = AuthorizationResponse::new().with(RedirectArtifact::Code, "secret-code");
        let printed = format!("{response:?}");
        assert!(printed.contains("code"));
        assert!(!printed.contains("secret-code"));
    }

    #[test]
    fn test_is_error_only_with_error_key() {
        let ok = AuthorizationResponse::new().with(RedirectArtifact::Code, "c");
        let failed = ok.clone().with(RedirectArtifact::Error, "access_denied");
        assert!(!ok.is_error());
        assert!(failed.is_error());
    }

    #[test]
    fn test_signals_challenge_method_only_with_that_key() {
        let plain = AuthorizationResponse::new().with(RedirectArtifact::State, "s");
        let signalled = plain.clone().with(RedirectArtifact::CodeChallengeMethod, "plain");
        assert!(!plain.signals_challenge_method());
        assert!(signalled.signals_challenge_method());
        assert!(!signalled.is_error());
    }
}
