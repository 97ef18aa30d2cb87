//! Integration tests for redirect sanitization.
//!
//! These drive the sanitizer through the public API only, with the
//! in-memory location standing in for a browser address bar.

#![cfg(feature = "memory")]

use std::sync::Arc;

use keygate_redirect::{Location, MemoryLocation, RedirectArtifact, RedirectSanitizer};
use url::Url;

fn keys_in(href: &str) -> Vec<String> {
    let url = Url::parse(href).unwrap();
    let mut keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    if let Some(fragment) = url.fragment() {
        keys.extend(url::form_urlencoded::parse(fragment.as_bytes()).map(|(k, _)| k.into_owned()));
    }
    keys
}

#[test]
fn test_sanitize_every_artifact_key_removed_path_kept() {
    let href = "http://localhost:3000/upload?code=c&iss=i\
                #state=s&session_state=ss&error=e&error_description=d";
    let location = Arc::new(MemoryLocation::new(href).unwrap());
    let sanitizer = RedirectSanitizer::new(location.clone());

    assert!(sanitizer.sanitize());

    let after = location.href();
    let remaining = keys_in(&after);
    for artifact in RedirectArtifact::ALL {
        assert!(!remaining.contains(&artifact.as_str().to_string()), "{artifact:?} survived");
    }
    assert_eq!(Url::parse(&after).unwrap().path(), "/upload");
    assert!(location.navigations().is_empty(), "sanitize must not navigate");
}

#[test]
fn test_sanitize_error_response_is_captured_as_error() {
    let location = Arc::new(
        MemoryLocation::new("http://localhost:3000/dashboard#error=invalid_request&state=abc123")
            .unwrap(),
    );
    let sanitizer = RedirectSanitizer::new(location.clone());

    assert!(sanitizer.sanitize());
    let captured = sanitizer.take_captured().unwrap();

    assert!(captured.is_error());
    assert_eq!(captured.error(), Some("invalid_request"));
    assert_eq!(location.href(), "http://localhost:3000/dashboard");
}

#[test]
fn test_sanitize_after_landing_again_captures_new_response() {
    let location = Arc::new(MemoryLocation::new("http://localhost:3000/#state=one").unwrap());
    let sanitizer = RedirectSanitizer::new(location.clone());

    sanitizer.sanitize();
    let _ = sanitizer.take_captured();

    location.land_on("http://localhost:3000/#state=two").unwrap();
    assert!(sanitizer.sanitize());
    assert_eq!(sanitizer.take_captured().unwrap().state(), Some("two"));
}
