//! Session-layer state and configuration.

use std::sync::Arc;
use std::time::Duration;

use keygate_protocol::Session;
use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// InitializationState
// ---------------------------------------------------------------------------

/// Why the last initialization attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    TimedOut,
    ProtocolMismatch,
    NetworkFailure,
    ProviderRejected,
    MalformedSession,
}

/// Where the session manager is in its lifecycle.
///
/// ```text
///   Uninitialized ──initialize()──→ Initializing ──ok──→ Ready
///         ↑                             │
///         │                             └──err──→ Failed(reason)
///         │                                            │
///         └──────────── logout() ◄──── initialize() ───┘ (back to Initializing)
/// ```
///
/// `Ready` says nothing about whether anyone is signed in. It means the
/// provider has answered. Check for a session separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitializationState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Failed(FailureReason),
}

/// A consistent read of the state and the session, taken under one lock.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: InitializationState,
    pub session: Option<Arc<Session>>,
}

impl SessionSnapshot {
    /// Returns `true` if a session is present.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// In-process retry for transient provider failures.
///
/// Attempt `n` (1-based) waits `initial_backoff_ms * 2^(n-1)`, capped at
/// `max_backoff_ms`, before attempt `n + 1`. With `jitter`, the wait is
/// drawn uniformly from the upper half of that window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. 1 disables retrying.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Upper bound on attempts a policy may ask for.
    pub const MAX_ATTEMPTS: u32 = 10;

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// How long to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let base = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        let ms = if self.jitter && base > 1 {
            rand::rng().random_range(base / 2..=base)
        } else {
            base
        };
        Duration::from_millis(ms)
    }

    /// Returns a copy with out-of-range values clamped.
    pub fn validated(&self) -> Self {
        let mut policy = self.clone();
        if policy.max_attempts == 0 {
            tracing::warn!("retry max_attempts is 0, using 1");
            policy.max_attempts = 1;
        }
        if policy.max_attempts > Self::MAX_ATTEMPTS {
            tracing::warn!(
                max_attempts = policy.max_attempts,
                limit = Self::MAX_ATTEMPTS,
                "retry max_attempts too large, clamping"
            );
            policy.max_attempts = Self::MAX_ATTEMPTS;
        }
        if policy.max_backoff_ms < policy.initial_backoff_ms {
            tracing::warn!(
                initial_backoff_ms = policy.initial_backoff_ms,
                max_backoff_ms = policy.max_backoff_ms,
                "max backoff below initial backoff, raising it"
            );
            policy.max_backoff_ms = policy.initial_backoff_ms;
        }
        policy
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long one initialization attempt (retries included) may take.
    ///
    /// Default: 10 seconds.
    pub init_timeout: Duration,

    pub retry: RetryPolicy,

    /// Where the user is sent when an authorization response has to be
    /// thrown away. Default: `/login`.
    pub login_path: String,

    /// Where a freshly signed-in user lands. Default: `/dashboard`.
    pub post_login_path: String,

    /// Prefix for every storage key the manager writes. Default: `keygate`.
    pub storage_namespace: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            login_path: "/login".to_string(),
            post_login_path: "/dashboard".to_string(),
            storage_namespace: "keygate".to_string(),
        }
    }
}

impl SessionConfig {
    /// Returns a copy with out-of-range values replaced by defaults.
    pub fn validated(&self) -> Self {
        let defaults = Self::default();
        let mut config = self.clone();
        if config.init_timeout.is_zero() {
            tracing::warn!("init_timeout is zero, using default");
            config.init_timeout = defaults.init_timeout;
        }
        config.retry = config.retry.validated();
        if !config.login_path.starts_with('/') {
            tracing::warn!(login_path = %config.login_path, "login_path must be absolute, using default");
            config.login_path = defaults.login_path;
        }
        if !config.post_login_path.starts_with('/') {
            tracing::warn!(
                post_login_path = %config.post_login_path,
                "post_login_path must be absolute, using default"
            );
            config.post_login_path = defaults.post_login_path;
        }
        if config.storage_namespace.is_empty() {
            tracing::warn!("storage_namespace is empty, using default");
            config.storage_namespace = defaults.storage_namespace;
        }
        config
    }
}
