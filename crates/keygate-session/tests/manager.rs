//! Integration tests for the session manager.
//!
//! Each test wires a real `SessionManager` to the in-memory provider,
//! address and storage, then drives it through the public API. Tests that
//! involve delays run on Tokio's paused clock, so a 20-second provider
//! stall takes no real time.

#![cfg(feature = "memory")]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use keygate_redirect::{Location, MemoryLocation, RedirectSanitizer};
use keygate_session::{
    FailureReason, IdpError, InitOptions, InitializationState, LoginOptions, LogoutOptions,
    MemoryIdp, MemoryStorage, MemoryUser, RetryPolicy, SessionConfig, SessionError,
    SessionManager, Storage,
};

struct Harness {
    manager: SessionManager<MemoryIdp>,
    idp: MemoryIdp,
    location: Arc<MemoryLocation>,
    storage: Arc<MemoryStorage>,
}

fn harness(href: &str, config: SessionConfig) -> Harness {
    let location = Arc::new(MemoryLocation::new(href).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let idp = MemoryIdp::new().with_location(location.clone());
    idp.set_user(MemoryUser::new("alice", "frontend-app", &["user"]).named("Alice", "Liddell"));
    let manager = SessionManager::new(
        idp.clone(),
        Arc::new(RedirectSanitizer::new(location.clone())),
        storage.clone(),
        config,
    );
    Harness {
        manager,
        idp,
        location,
        storage,
    }
}

fn no_jitter() -> SessionConfig {
    SessionConfig {
        retry: RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        },
        ..SessionConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Single flight
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_initialize_concurrent_callers_share_one_attempt() {
    let h = harness("http://localhost:3000/", SessionConfig::default());
    h.idp.set_sso_session(true);
    h.idp.set_init_delay(Duration::from_millis(500));

    let calls = (0..8).map(|_| h.manager.initialize(InitOptions::default()));
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| *r == Ok(true)), "{results:?}");
    assert_eq!(h.idp.calls().init, 1);
    assert_eq!(h.manager.state(), InitializationState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_concurrent_callers_share_one_error() {
    let h = harness("http://localhost:3000/", SessionConfig::default());
    h.idp.set_init_delay(Duration::from_millis(100));
    h.idp.fail_next_init(IdpError::Rejected("realm disabled".into()));

    let results = join_all((0..4).map(|_| h.manager.initialize(InitOptions::default()))).await;

    let first = results[0].clone();
    assert!(matches!(first, Err(SessionError::ProviderRejected { .. })));
    assert!(results.iter().all(|r| *r == first));
    assert_eq!(h.idp.calls().init, 1);
}

#[tokio::test]
async fn test_initialize_while_in_flight_from_spawned_tasks_single_call() {
    let h = harness("http://localhost:3000/", SessionConfig::default());
    h.idp.set_init_delay(Duration::from_millis(20));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.initialize(InitOptions::default()).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(false));
    }
    assert_eq!(h.idp.calls().init, 1);
}

// ---------------------------------------------------------------------------
// Timeout and retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_initialize_slow_provider_times_out_then_recovers() {
    let h = harness("http://localhost:3000/", SessionConfig::default());
    h.idp.set_init_delay(Duration::from_secs(20));

    let result = h.manager.initialize(InitOptions::default()).await;

    assert_eq!(result, Err(SessionError::InitializationTimeout { after_ms: 10_000 }));
    assert_eq!(h.manager.state(), InitializationState::Failed(FailureReason::TimedOut));

    // A later call starts afresh.
    h.idp.set_init_delay(Duration::ZERO);
    assert_eq!(h.manager.initialize(InitOptions::default()).await, Ok(false));
    assert_eq!(h.manager.state(), InitializationState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_network_failures_retried_until_success() {
    let h = harness("http://localhost:3000/", no_jitter());
    h.idp.fail_next_init(IdpError::Network("connection refused".into()));
    h.idp.fail_next_init(IdpError::Network("connection refused".into()));

    let start = tokio::time::Instant::now();
    assert_eq!(h.manager.initialize(InitOptions::default()).await, Ok(false));

    assert_eq!(h.idp.calls().init, 3);
    // 200 ms + 400 ms of backoff.
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(600) && waited < Duration::from_millis(700), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_initialize_network_failures_exhaust_retries() {
    let h = harness("http://localhost:3000/", no_jitter());
    for _ in 0..3 {
        h.idp.fail_next_init(IdpError::Network("dns".into()));
    }

    let result = h.manager.initialize(InitOptions::default()).await;

    assert!(matches!(result, Err(SessionError::NetworkFailure { .. })));
    assert_eq!(h.idp.calls().init, 3);
    assert_eq!(h.manager.state(), InitializationState::Failed(FailureReason::NetworkFailure));
    assert_eq!(h.location.navigations().len(), 0, "no reload-style recovery");
}

#[tokio::test]
async fn test_initialize_rejection_is_not_retried() {
    let h = harness("http://localhost:3000/", SessionConfig::default());
    h.idp.fail_next_init(IdpError::Rejected("nope".into()));

    let result = h.manager.initialize(InitOptions::default()).await;

    assert!(matches!(result, Err(SessionError::ProviderRejected { .. })));
    assert_eq!(h.idp.calls().init, 1);
    let failure = h.manager.last_failure().unwrap();
    assert_eq!(failure.detail(), Some("nope"));
}

// ---------------------------------------------------------------------------
// Protocol mismatch recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_initialize_error_fragment_recovers_to_login_once() {
    let h = harness(
        "http://localhost:3000/dashboard#error=invalid_request&state=abc123",
        SessionConfig::default(),
    );
    h.manager.registry().put("login.attempt", "stale").unwrap();
    h.storage.set("unrelated", "keep").unwrap();

    let first = h.manager.initialize(InitOptions::default()).await;

    assert_eq!(first, Ok(false));
    assert_eq!(
        h.manager.state(),
        InitializationState::Failed(FailureReason::ProtocolMismatch)
    );
    assert_eq!(h.location.navigations(), vec!["http://localhost:3000/login"]);
    assert_eq!(h.location.href(), "http://localhost:3000/login");
    assert_eq!(h.storage.keys(), vec!["unrelated"]);
    assert_eq!(h.idp.calls().clear_token, 1);
    assert_eq!(h.idp.calls().init, 0, "a provider error is never replayed");

    // The address is clean now. Asking again doesn't bounce back to login.
    let second = h.manager.initialize(InitOptions::default()).await;
    assert_eq!(second, Ok(false));
    assert_eq!(h.location.navigations().len(), 1);
    assert_eq!(h.manager.state(), InitializationState::Ready);
}

#[tokio::test]
async fn test_initialize_provider_mismatch_recovers_to_login() {
    let h = harness("http://localhost:3000/dashboard#state=s&code=forged", SessionConfig::default());

    assert_eq!(h.manager.initialize(InitOptions::default()).await, Ok(false));

    assert_eq!(h.idp.calls().init, 1);
    assert_eq!(h.location.navigations(), vec!["http://localhost:3000/login"]);
    let failure = h.manager.last_failure().unwrap();
    // Generic text for users, provider detail kept aside.
    assert_eq!(failure.to_string(), "the sign-in response could not be processed");
    assert!(failure.detail().unwrap().contains("does not match"));
}

#[tokio::test]
async fn test_initialize_challenge_method_in_address_recovers_to_login() {
    let h = harness("http://localhost:3000/dashboard?code_challenge_method=plain", SessionConfig::default());

    assert_eq!(h.manager.initialize(InitOptions::default()).await, Ok(false));

    assert_eq!(
        h.manager.state(),
        InitializationState::Failed(FailureReason::ProtocolMismatch)
    );
    assert_eq!(h.idp.calls().init, 0);
    assert_eq!(h.location.navigations(), vec!["http://localhost:3000/login"]);
    assert!(!h.location.href().contains("code_challenge_method"));
    let failure = h.manager.last_failure().unwrap();
    assert!(failure.detail().unwrap().contains("code_challenge_method=plain"));
}

// ---------------------------------------------------------------------------
// Login round trip and logout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_round_trip_replays_response_and_cleans_up() {
    let h = harness("http://localhost:3000/login", SessionConfig::default());

    h.manager.login(LoginOptions::default()).await.unwrap();
    assert!(h.location.href().starts_with("http://localhost:3000/dashboard#state="));
    assert_eq!(h.storage.keys().len(), 3, "two entries plus the index");

    // The page loads again on the redirect target.
    assert_eq!(h.manager.initialize(InitOptions::default()).await, Ok(true));

    assert_eq!(h.location.href(), "http://localhost:3000/dashboard");
    assert!(h.idp.last_init().unwrap().callback.is_some());
    assert!(h.manager.token().is_some());
    assert!(h.storage.keys().is_empty());
}

#[tokio::test]
async fn test_initialize_replay_at_root_moves_to_post_login_path() {
    let h = harness("http://localhost:3000/login", SessionConfig::default());
    h.manager
        .login(LoginOptions {
            redirect_uri: Some("http://localhost:3000/".into()),
        })
        .await
        .unwrap();

    assert_eq!(h.manager.initialize(InitOptions::default()).await, Ok(true));

    assert_eq!(h.location.href(), "http://localhost:3000/dashboard");
}

#[tokio::test]
async fn test_logout_clears_session_and_state() {
    let h = harness("http://localhost:3000/", SessionConfig::default());
    h.idp.set_sso_session(true);
    h.manager.initialize(InitOptions::default()).await.unwrap();
    assert!(h.manager.is_logged_in());

    h.manager.logout(LogoutOptions::default()).await;

    assert!(!h.manager.is_logged_in());
    assert_eq!(h.manager.token(), None);
    assert_eq!(h.manager.state(), InitializationState::Uninitialized);
    assert_eq!(
        h.idp.last_logout().unwrap().redirect_uri.as_deref(),
        Some("http://localhost:3000")
    );
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_initialize_discards_result() {
    let h = harness("http://localhost:3000/", SessionConfig::default());
    h.idp.set_sso_session(true);
    h.idp.set_init_delay(Duration::from_secs(1));

    let manager = h.manager.clone();
    let attempt = tokio::spawn(async move { manager.initialize(InitOptions::default()).await });
    // Let the attempt reach the provider.
    tokio::task::yield_now().await;
    assert_eq!(h.manager.state(), InitializationState::Initializing);

    h.manager.logout(LogoutOptions::default()).await;
    // The provider still answers "signed in" for the stale attempt.
    h.idp.set_sso_session(true);

    assert_eq!(attempt.await.unwrap(), Ok(false));
    assert!(!h.manager.is_logged_in());
    assert_eq!(h.manager.state(), InitializationState::Uninitialized);
}

#[tokio::test]
async fn test_force_login_drops_session_and_starts_login() {
    let h = harness("http://localhost:3000/documents", SessionConfig::default());
    h.idp.set_sso_session(true);
    h.manager.initialize(InitOptions::default()).await.unwrap();

    h.manager.force_login().await.unwrap();

    assert!(!h.manager.is_logged_in());
    assert_eq!(h.idp.calls().login, 1);
    assert_eq!(h.idp.calls().clear_token, 1);
}

#[tokio::test]
async fn test_force_login_concurrent_callers_one_login() {
    let h = harness("http://localhost:3000/documents", SessionConfig::default());
    h.idp.set_sso_session(true);
    h.manager.initialize(InitOptions::default()).await.unwrap();

    let calls = (0..3).map(|_| h.manager.force_login());
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(h.idp.calls().login, 1);
    assert_eq!(h.idp.calls().clear_token, 1);
}

#[tokio::test]
async fn test_force_login_resets_state_so_initialize_asks_provider() {
    let h = harness("http://localhost:3000/documents", SessionConfig::default());
    h.idp.set_sso_session(true);
    h.manager.initialize(InitOptions::default()).await.unwrap();
    assert_eq!(h.idp.calls().init, 1);

    h.manager.force_login().await.unwrap();
    assert_eq!(h.manager.state(), InitializationState::Uninitialized);

    h.manager.initialize(InitOptions::default()).await.unwrap();
    assert_eq!(h.idp.calls().init, 2);
}

#[tokio::test]
async fn test_force_login_after_provider_failure_can_retry() {
    let location = Arc::new(MemoryLocation::new("http://localhost:3000/documents").unwrap());
    let idp = MemoryIdp::new().with_location(location.clone());
    let manager = SessionManager::new(
        idp.clone(),
        Arc::new(RedirectSanitizer::new(location)),
        Arc::new(MemoryStorage::new()),
        SessionConfig::default(),
    );

    assert!(manager.force_login().await.is_err());
    idp.set_user(MemoryUser::new("alice", "frontend-app", &["user"]));
    manager.force_login().await.unwrap();

    assert_eq!(idp.calls().login, 2);
}
