//! Integration tests for the token lifecycle.
//!
//! Expiry is driven by a `ManualClock` shared between the in-memory
//! provider (which stamps `exp`) and the lifecycle (which checks it).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keygate_protocol::ManualClock;
use keygate_redirect::{MemoryLocation, RedirectSanitizer};
use keygate_session::{
    IdpError, IdpEvent, InitOptions, LogoutOptions, MemoryIdp, MemoryStorage, MemoryUser,
    SessionConfig, SessionError, SessionManager,
};
use keygate_token::{RefreshOutcome, RefreshTrigger, TokenConfig, TokenLifecycle};

const T0: i64 = 1_700_000_000;

// =========================================================================
// Helpers
// =========================================================================

/// A lifecycle over a signed-in session whose token expires at `T0 + 300`.
async fn signed_in() -> (TokenLifecycle<MemoryIdp>, MemoryIdp, ManualClock) {
    let clock = ManualClock::new(T0);
    let location = Arc::new(MemoryLocation::new("http://localhost:3000/dashboard").unwrap());
    let idp = MemoryIdp::new().with_clock(Arc::new(clock.clone()));
    idp.set_user(MemoryUser::new("alice", "frontend-app", &["user"]).with_token_lifetime(300));
    idp.set_sso_session(true);

    let manager = SessionManager::new(
        idp.clone(),
        Arc::new(RedirectSanitizer::new(location)),
        Arc::new(MemoryStorage::new()),
        SessionConfig::default(),
    );
    assert_eq!(manager.initialize(InitOptions::default()).await, Ok(true));

    let lifecycle = TokenLifecycle::new(manager, Arc::new(clock.clone()), TokenConfig::default());
    (lifecycle, idp, clock)
}

/// Yields until `condition` holds, failing after a bounded number of turns.
async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

// =========================================================================
// Expiry checks
// =========================================================================

#[tokio::test]
async fn test_is_expired_skew_boundary() {
    let (lifecycle, _, clock) = signed_in().await;

    clock.set(T0 + 269);
    assert!(!lifecycle.is_expired(30));

    clock.set(T0 + 270);
    assert!(lifecycle.is_expired(30));
}

#[tokio::test]
async fn test_is_expired_without_session_is_true() {
    let (lifecycle, _, _) = signed_in().await;
    lifecycle.manager().logout(LogoutOptions::default()).await;

    assert!(lifecycle.is_expired(0));
    assert_eq!(lifecycle.seconds_remaining(), None);
    assert!(!lifecycle.needs_renewal(), "nothing to renew without a session");
}

// =========================================================================
// On-demand refresh
// =========================================================================

#[tokio::test]
async fn test_refresh_still_valid_returns_false() {
    let (lifecycle, _, _) = signed_in().await;
    let before = lifecycle.manager().token();

    assert_eq!(lifecycle.refresh(30).await, Ok(false));

    assert_eq!(lifecycle.manager().token(), before);
    assert_eq!(lifecycle.last_refresh().unwrap().outcome, RefreshOutcome::NotNeeded);
}

#[tokio::test]
async fn test_refresh_near_expiry_replaces_session_whole() {
    let (lifecycle, _, clock) = signed_in().await;
    let old = lifecycle.manager().session().unwrap();

    clock.advance(280);
    assert_eq!(lifecycle.refresh(30).await, Ok(true));

    let renewed = lifecycle.manager().session().unwrap();
    assert_eq!(renewed.expiry_epoch_seconds, T0 + 280 + 300);
    assert_ne!(renewed.raw_token, old.raw_token);
    // The old snapshot is untouched.
    assert_eq!(old.expiry_epoch_seconds, T0 + 300);
}

#[tokio::test]
async fn test_refresh_provider_failure_is_refresh_failure() {
    let (lifecycle, idp, clock) = signed_in().await;
    idp.set_refresh_failure(Some(IdpError::Network("timeout".into())));
    clock.advance(290);

    let result = lifecycle.refresh(30).await;

    assert!(matches!(result, Err(SessionError::RefreshFailure { .. })));
    assert!(lifecycle.manager().is_logged_in(), "refresh failure alone keeps the session");
    assert!(lifecycle.needs_renewal());
}

#[tokio::test]
async fn test_refresh_without_session_is_unauthenticated() {
    let (lifecycle, idp, _) = signed_in().await;
    lifecycle.manager().invalidate_session();

    assert_eq!(lifecycle.refresh(5).await, Err(SessionError::Unauthenticated));
    assert_eq!(idp.calls().update_token, 0);
}

// =========================================================================
// Scheduled path
// =========================================================================

#[tokio::test]
async fn test_on_token_expired_failure_recorded_not_retried() {
    let (lifecycle, idp, clock) = signed_in().await;
    idp.set_refresh_failure(Some(IdpError::Rejected("session revoked".into())));
    clock.advance(300);

    lifecycle.on_token_expired().await;

    let record = lifecycle.last_refresh().unwrap();
    assert_eq!(record.trigger, RefreshTrigger::Scheduled);
    assert!(matches!(record.outcome, RefreshOutcome::Failed(SessionError::RefreshFailure { .. })));
    assert_eq!(idp.calls().update_token, 1);
    assert!(lifecycle.needs_renewal());
}

#[tokio::test]
async fn test_needs_renewal_cleared_by_later_success() {
    let (lifecycle, idp, clock) = signed_in().await;
    idp.set_refresh_failure(Some(IdpError::Network("blip".into())));
    clock.advance(290);
    lifecycle.on_token_expired().await;
    assert!(lifecycle.needs_renewal());

    idp.set_refresh_failure(None);
    assert_eq!(lifecycle.refresh(30).await, Ok(true));

    assert!(!lifecycle.needs_renewal());
}

#[tokio::test(start_paused = true)]
async fn test_watch_events_token_expired_triggers_renewal() {
    let (lifecycle, idp, clock) = signed_in().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        lifecycle.subscribe(move |event: &IdpEvent| seen.lock().unwrap().push(event.clone()));
    }
    let pump = lifecycle.watch_events();
    tokio::task::yield_now().await;

    clock.advance(285);
    idp.fire(IdpEvent::TokenExpired);

    eventually(|| lifecycle.last_refresh().is_some()).await;
    assert_eq!(lifecycle.last_refresh().unwrap().outcome, RefreshOutcome::Renewed);
    assert_eq!(*seen.lock().unwrap(), vec![IdpEvent::TokenExpired]);

    pump.abort();
    let _ = tokio::time::timeout(Duration::from_secs(1), pump).await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (lifecycle, _, _) = signed_in().await;
    let hits = Arc::new(Mutex::new(0));
    let id = {
        let hits = Arc::clone(&hits);
        lifecycle.subscribe(move |_: &IdpEvent| *hits.lock().unwrap() += 1)
    };

    assert_eq!(lifecycle.notify(&IdpEvent::AuthSuccess), 1);
    assert!(lifecycle.unsubscribe(id));
    assert_eq!(lifecycle.notify(&IdpEvent::AuthSuccess), 0);
    assert_eq!(*hits.lock().unwrap(), 1);
}
