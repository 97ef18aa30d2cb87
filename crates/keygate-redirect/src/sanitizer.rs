//! Stripping authorization-response artifacts from the address.
//!
//! ```text
//!   http://app/dashboard#state=abc&session_state=s&code=c
//!        │
//!        │ sanitize()
//!        ▼
//!   http://app/dashboard          (history entry replaced, no navigation)
//!   captured = { state: abc, session_state: s, code: c }
//! ```
//!
//! Both the fragment and the query are inspected because providers use
//! either, depending on the response mode. When the same key appears in
//! both, the fragment wins.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};
use url::Url;

use crate::{AuthorizationResponse, Location, RedirectArtifact};

/// Removes [`RedirectArtifact`] keys from a [`Location`] and keeps what it
/// removed until someone takes it.
pub struct RedirectSanitizer {
    location: Arc<dyn Location>,
    captured: Mutex<Option<AuthorizationResponse>>,
}

impl RedirectSanitizer {
    /// Creates a sanitizer over `location`. Does not touch the address yet.
    pub fn new(location: Arc<dyn Location>) -> Self {
        Self {
            location,
            captured: Mutex::new(None),
        }
    }

    /// Strips artifacts from the current address.
    ///
    /// Returns `true` if the address was rewritten. An already-clean
    /// address is left alone and returns `false`, so calling this any
    /// number of times is safe.
    pub fn sanitize(&self) -> bool {
        let href = self.location.href();
        let url = match Url::parse(&href) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "current address is not parseable, skipping sanitization");
                return false;
            }
        };

        let response = extract(&url);
        if response.is_empty() {
            return false;
        }

        // An absolute target keeps a `//`-leading path on this origin.
        let path = url.path().to_string();
        let mut clean = url;
        clean.set_query(None);
        clean.set_fragment(None);
        if let Err(e) = self.location.replace_state(clean.as_str()) {
            warn!(error = %e, %path, "failed to rewrite address, artifacts left in place");
            return false;
        }

        info!(%path, keys = ?response.keys(), "stripped redirect artifacts from address");
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        if captured.is_some() {
            debug!("replacing an unconsumed authorization response");
        }
        *captured = Some(response);
        true
    }

    /// Hands over the last captured response. Subsequent calls return
    /// `None` until another sanitization captures something.
    pub fn take_captured(&self) -> Option<AuthorizationResponse> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The location this sanitizer works on.
    pub fn location(&self) -> &Arc<dyn Location> {
        &self.location
    }
}

impl std::fmt::Debug for RedirectSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectSanitizer")
            .field("href", &self.location.href())
            .finish_non_exhaustive()
    }
}

fn extract(url: &Url) -> AuthorizationResponse {
    let mut response = AuthorizationResponse::new();
    let query = url.query_pairs();
    let fragment = url
        .fragment()
        .map(|f| url::form_urlencoded::parse(f.as_bytes()))
        .into_iter()
        .flatten();

    // Query first so that fragment values overwrite.
    for (key, value) in query.chain(fragment) {
        if let Some(artifact) = RedirectArtifact::from_key(&key) {
            response.insert(artifact, value.into_owned());
        }
    }
    response
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::MemoryLocation;

    fn sanitizer_at(href: &str) -> (Arc<MemoryLocation>, RedirectSanitizer) {
        let location = Arc::new(MemoryLocation::new(href).unwrap());
        let sanitizer = RedirectSanitizer::new(location.clone());
        (location, sanitizer)
    }

    #[test]
    fn test_sanitize_fragment_strips_and_captures() {
        let (location, sanitizer) =
            sanitizer_at("http://localhost:3000/dashboard#state=abc&code=xyz");

        assert!(sanitizer.sanitize());
        assert_eq!(location.href(), "http://localhost:3000/dashboard");

        let captured = sanitizer.take_captured().expect("should capture");
        assert_eq!(captured.state(), Some("abc"));
        assert_eq!(captured.code(), Some("xyz"));
    }

    #[test]
    fn test_sanitize_clean_address_returns_false() {
        let (location, sanitizer) = sanitizer_at("http://localhost:3000/documents?page=2");
        assert!(!sanitizer.sanitize());
        // Non-artifact query parameters alone don't trigger a rewrite.
        assert_eq!(location.href(), "http://localhost:3000/documents?page=2");
        assert!(sanitizer.take_captured().is_none());
    }

    #[test]
    fn test_sanitize_second_call_is_noop() {
        let (location, sanitizer) = sanitizer_at("http://localhost:3000/?error=invalid_request");
        assert!(sanitizer.sanitize());
        assert!(!sanitizer.sanitize());
        assert_eq!(location.history().len(), 1);
    }

    #[test]
    fn test_sanitize_fragment_overrides_query() {
        let (_, sanitizer) = sanitizer_at("http://localhost:3000/?state=from-query#state=from-fragment");
        sanitizer.sanitize();
        assert_eq!(sanitizer.take_captured().unwrap().state(), Some("from-fragment"));
    }

    #[test]
    fn test_take_captured_only_once() {
        let (_, sanitizer) = sanitizer_at("http://localhost:3000/#iss=http%3A%2F%2Fidp");
        sanitizer.sanitize();
        let first = sanitizer.take_captured().unwrap();
        assert_eq!(first.get(RedirectArtifact::Iss), Some("http://idp"));
        assert!(sanitizer.take_captured().is_none());
    }

    #[test]
    fn test_sanitize_double_slash_path_stays_on_origin() {
        let (location, sanitizer) = sanitizer_at("http://localhost:3000//docs/a?state=s&code=c");

        assert!(sanitizer.sanitize());

        assert_eq!(location.href(), "http://localhost:3000//docs/a");
        assert_eq!(sanitizer.take_captured().unwrap().code(), Some("c"));
    }

    #[test]
    fn test_sanitize_challenge_method_is_stripped_and_captured() {
        let (location, sanitizer) =
            sanitizer_at("http://localhost:3000/dashboard?code_challenge_method=plain");

        assert!(sanitizer.sanitize());

        assert_eq!(location.href(), "http://localhost:3000/dashboard");
        let captured = sanitizer.take_captured().unwrap();
        assert!(captured.signals_challenge_method());
        assert_eq!(captured.get(RedirectArtifact::CodeChallengeMethod), Some("plain"));
    }
}
