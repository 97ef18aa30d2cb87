//! End-to-end flows through `AuthContext`.
//!
//! A "page load" is a fresh context built over the same provider, address
//! and storage, the way a browser reload rebuilds application state while
//! the address and session storage survive.

#![cfg(feature = "memory")]

use std::sync::Arc;
use std::time::Duration;

use keygate::prelude::*;
use keygate::session::FailureReason;

const T0: i64 = 1_700_000_000;

struct Browser {
    idp: MemoryIdp,
    location: Arc<MemoryLocation>,
    storage: Arc<MemoryStorage>,
    clock: ManualClock,
}

impl Browser {
    fn open(href: &str) -> Self {
        let clock = ManualClock::new(T0);
        let location = Arc::new(MemoryLocation::new(href).unwrap());
        let idp = MemoryIdp::new()
            .with_clock(Arc::new(clock.clone()))
            .with_location(location.clone());
        idp.set_user(
            MemoryUser::new("bob", "frontend-app", &["user", "admin"])
                .named("Bob", "Stone")
                .with_token_lifetime(300),
        );
        Self {
            idp,
            location,
            storage: Arc::new(MemoryStorage::new()),
            clock,
        }
    }

    fn load(&self) -> AuthContext<MemoryIdp> {
        AuthContext::builder(self.idp.clone())
            .location(self.location.clone())
            .storage(self.storage.clone())
            .clock(Arc::new(self.clock.clone()))
            .build()
            .unwrap()
    }
}

#[tokio::test]
async fn test_login_round_trip_across_page_loads() {
    let browser = Browser::open("http://localhost:3000/login");

    let first = browser.load();
    assert_eq!(first.initialize().await, Ok(false));
    first.login().await.unwrap();
    assert!(browser.location.href().contains("#state="));

    let second = browser.load();
    // The address is already clean before initialize runs.
    assert_eq!(browser.location.href(), "http://localhost:3000/dashboard");
    assert_eq!(second.initialize().await, Ok(true));

    assert_eq!(second.full_name(), "Bob Stone");
    assert!(second.has_role("admin"));
    assert_eq!(second.decide("/documents"), Decision::Allow);
    assert!(browser.storage.keys().is_empty());
}

#[tokio::test]
async fn test_error_response_recovers_to_login_once() {
    let browser = Browser::open("http://localhost:3000/dashboard#error=invalid_request&state=abc123");
    let auth = browser.load();

    assert_eq!(auth.initialize().await, Ok(false));

    assert_eq!(auth.state(), InitializationState::Failed(FailureReason::ProtocolMismatch));
    assert_eq!(browser.location.navigations(), vec!["http://localhost:3000/login"]);
    assert_eq!(auth.error_detail(), None);

    let reloaded = browser.load();
    assert_eq!(reloaded.initialize().await, Ok(false));
    assert_eq!(browser.location.navigations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_from_many_mount_points_contacts_provider_once() {
    let browser = Browser::open("http://localhost:3000/");
    browser.idp.set_sso_session(true);
    browser.idp.set_init_delay(Duration::from_millis(250));
    let auth = Arc::new(browser.load());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.initialize().await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(true));
    }

    assert_eq!(browser.idp.calls().init, 1);
    assert!(auth.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn test_token_expired_event_renews_in_background() {
    let browser = Browser::open("http://localhost:3000/");
    browser.idp.set_sso_session(true);
    let auth = browser.load();
    auth.initialize().await.unwrap();
    let before = auth.token().unwrap();

    browser.clock.advance(290);
    browser.idp.fire(IdpEvent::TokenExpired);
    for _ in 0..1_000 {
        if auth.lifecycle().last_refresh().is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(auth.lifecycle().last_refresh().unwrap().outcome, RefreshOutcome::Renewed);
    assert_ne!(auth.token().unwrap(), before);
}

#[tokio::test]
async fn test_logout_then_guard_sends_to_login() {
    let browser = Browser::open("http://localhost:3000/profile");
    browser.idp.set_sso_session(true);
    let auth = browser.load();
    auth.initialize().await.unwrap();

    auth.logout().await;

    assert!(!auth.is_logged_in());
    assert_eq!(auth.token(), None);
    let decision = auth.decide("/profile");
    assert_eq!(auth.redirect_target(&decision), Some("/login"));
}
