//! Token lifecycle for Keygate.
//!
//! Knows when the session's token expires, renews it on demand or when the
//! provider says it expired, and fans the provider's events out to
//! listeners.
//!
//! # Two renewal paths
//!
//! ```text
//!  on demand:   caller ──refresh(min)──→ IdpClient::update_token ──→ Result back to caller
//!
//!  scheduled:   IdpEvent::TokenExpired ──→ on_token_expired() ──→ refresh(30)
//!                                                                   │
//!                                          failure recorded, never retried
//! ```
//!
//! The scheduled path is fire-and-forget. If it fails, nothing retries it.
//! The next request sees [`TokenLifecycle::needs_renewal`] and renews (or
//! sends the user back through login) itself.
//!
//! # Integration
//!
//! ```ignore
//! let lifecycle = TokenLifecycle::new(manager.clone(), Arc::new(SystemClock), TokenConfig::default());
//! let pump = lifecycle.watch_events();
//! // ...
//! pump.abort();
//! ```

mod listeners;

use std::sync::{Arc, Mutex, PoisonError};

use keygate_protocol::Clock;
use keygate_session::{IdpClient, IdpError, IdpEvent, SessionError, SessionManager};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use listeners::SubscriptionId;
use listeners::Listeners;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Renewal thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// Minimum validity requested when reacting to a token-expired event.
    /// Default: 30 seconds.
    pub scheduled_min_validity_secs: i64,
    /// Minimum validity requested right before a backend call. Default: 5.
    pub request_min_validity_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            scheduled_min_validity_secs: 30,
            request_min_validity_secs: 5,
        }
    }
}

impl TokenConfig {
    /// Upper bound for either threshold. A token asked to stay valid for
    /// longer than this would be renewed on every call.
    pub const MAX_MIN_VALIDITY_SECS: i64 = 3_600;

    /// Clamps both thresholds to `0..=MAX_MIN_VALIDITY_SECS`.
    pub fn validated(mut self) -> Self {
        for (name, value) in [
            ("scheduled_min_validity_secs", &mut self.scheduled_min_validity_secs),
            ("request_min_validity_secs", &mut self.request_min_validity_secs),
        ] {
            let clamped = (*value).clamp(0, Self::MAX_MIN_VALIDITY_SECS);
            if clamped != *value {
                warn!(field = name, value = *value, clamped, "token threshold out of range, clamping");
                *value = clamped;
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Refresh records
// ---------------------------------------------------------------------------

/// What asked for a renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// A token-expired notification from the provider.
    Scheduled,
    /// An explicit [`TokenLifecycle::refresh`] call.
    OnDemand,
}

/// How a renewal ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Renewed,
    NotNeeded,
    Failed(SessionError),
}

/// The most recent renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRecord {
    pub trigger: RefreshTrigger,
    pub outcome: RefreshOutcome,
    pub at_epoch_seconds: i64,
}

// ---------------------------------------------------------------------------
// TokenLifecycle
// ---------------------------------------------------------------------------

struct Inner<I: IdpClient> {
    manager: SessionManager<I>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
    listeners: Listeners,
    last_refresh: Mutex<Option<RefreshRecord>>,
}

/// Expiry checks, renewal, and event subscriptions over a [`SessionManager`].
///
/// Cheap to clone. Clones share listeners and the refresh record.
pub struct TokenLifecycle<I: IdpClient> {
    inner: Arc<Inner<I>>,
}

impl<I: IdpClient> Clone for TokenLifecycle<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: IdpClient> TokenLifecycle<I> {
    pub fn new(manager: SessionManager<I>, clock: Arc<dyn Clock>, config: TokenConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                clock,
                config: config.validated(),
                listeners: Listeners::default(),
                last_refresh: Mutex::new(None),
            }),
        }
    }

    /// `true` if the token expires within `skew_seconds` from now, or if
    /// there is no session at all.
    pub fn is_expired(&self, skew_seconds: i64) -> bool {
        match self.inner.manager.session() {
            Some(session) => {
                self.inner.clock.now_epoch_seconds() + skew_seconds >= session.expiry_epoch_seconds
            }
            None => true,
        }
    }

    /// Seconds until the current token expires. `None` without a session.
    pub fn seconds_remaining(&self) -> Option<i64> {
        let now = self.inner.clock.now_epoch_seconds();
        self.inner.manager.session().map(|s| s.seconds_remaining(now))
    }

    /// Renews the token if it expires within `min_validity_seconds`.
    ///
    /// `Ok(false)`: still valid, nothing done. `Ok(true)`: a new token was
    /// adopted and the session replaced.
    ///
    /// # Errors
    /// [`SessionError::Unauthenticated`] without a session,
    /// [`SessionError::RefreshFailure`] when the provider refuses, and
    /// [`SessionError::MalformedSession`] when the renewed token is unusable.
    pub async fn refresh(&self, min_validity_seconds: i64) -> Result<bool, SessionError> {
        self.refresh_as(RefreshTrigger::OnDemand, min_validity_seconds).await
    }

    /// Reacts to a token-expired notification with one renewal attempt.
    /// A failure is recorded and logged, nothing more.
    pub async fn on_token_expired(&self) {
        let min = self.inner.config.scheduled_min_validity_secs;
        match self.refresh_as(RefreshTrigger::Scheduled, min).await {
            Ok(renewed) => debug!(renewed, "scheduled renewal finished"),
            Err(e) => warn!(error = %e, "scheduled renewal failed, deferring to next request"),
        }
    }

    /// `true` when a session exists but its token shouldn't be sent as-is:
    /// it has expired, or the last renewal failed.
    pub fn needs_renewal(&self) -> bool {
        if self.inner.manager.session().is_none() {
            return false;
        }
        let last_failed = matches!(
            self.last_refresh(),
            Some(RefreshRecord {
                outcome: RefreshOutcome::Failed(_),
                ..
            })
        );
        last_failed || self.is_expired(0)
    }

    pub fn last_refresh(&self) -> Option<RefreshRecord> {
        self.inner
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Registers `listener` for every provider event. Listeners run in
    /// subscription order on the task that delivers the event.
    pub fn subscribe(&self, listener: impl Fn(&IdpEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.inner.listeners.subscribe(Arc::new(listener));
        debug!(%id, "event listener subscribed");
        id
    }

    /// Removes a listener. Returns `false` if `id` wasn't subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    /// Delivers `event` to every listener. Returns how many were called.
    pub fn notify(&self, event: &IdpEvent) -> usize {
        self.inner.listeners.notify(event)
    }

    /// Number of subscribed listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Spawns a task that pumps the provider's events into the listener
    /// list and reacts to `TokenExpired`. Abort the handle to stop it.
    pub fn watch_events(&self) -> JoinHandle<()> {
        let mut events = self.inner.manager.idp().subscribe();
        let lifecycle = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        lifecycle.notify(&event);
                        match event {
                            IdpEvent::TokenExpired => lifecycle.on_token_expired().await,
                            IdpEvent::AuthError { .. } => warn!("identity provider reported an error"),
                            IdpEvent::AuthSuccess => debug!("identity provider reported success"),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event pump fell behind, some events were dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("provider event channel closed, stopping pump");
                        break;
                    }
                }
            }
        })
    }

    pub fn manager(&self) -> &SessionManager<I> {
        &self.inner.manager
    }

    pub fn config(&self) -> &TokenConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn refresh_as(
        &self,
        trigger: RefreshTrigger,
        min_validity_seconds: i64,
    ) -> Result<bool, SessionError> {
        let result = self.renew(min_validity_seconds).await;
        let outcome = match &result {
            Ok(true) => RefreshOutcome::Renewed,
            Ok(false) => RefreshOutcome::NotNeeded,
            Err(e) => RefreshOutcome::Failed(e.clone()),
        };
        let record = RefreshRecord {
            trigger,
            outcome,
            at_epoch_seconds: self.inner.clock.now_epoch_seconds(),
        };
        *self
            .inner
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(record);
        result
    }

    async fn renew(&self, min_validity_seconds: i64) -> Result<bool, SessionError> {
        let manager = &self.inner.manager;
        if manager.session().is_none() {
            return Err(SessionError::Unauthenticated);
        }

        match manager.idp().update_token(min_validity_seconds).await {
            Ok(false) => {
                debug!(min_validity_seconds, "token still valid, no renewal needed");
                Ok(false)
            }
            Ok(true) => {
                let session = manager.adopt_renewed_token()?;
                info!(expiry = session.expiry_epoch_seconds, "token renewed");
                Ok(true)
            }
            Err(IdpError::NotAuthenticated) => Err(SessionError::Unauthenticated),
            Err(e) => {
                debug!(error = %e, "renewal error detail");
                Err(SessionError::RefreshFailure { detail: e.to_string() })
            }
        }
    }
}
