//! Wall-clock abstraction for expiry checks.
//!
//! Token expiry is expressed in epoch seconds (the `exp` claim), so the
//! monotonic `Instant` used elsewhere doesn't help here. Everything that
//! compares against `exp` asks a [`Clock`] instead of calling the system
//! time directly, which lets tests move time forward by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A source of the current time in Unix epoch seconds.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time as seconds since the Unix epoch.
    fn now_epoch_seconds(&self) -> i64;
}

/// The real clock, backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying counter, so a test can hand one clone
/// to the component under test and keep another to advance time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock frozen at `epoch_seconds`.
    pub fn new(epoch_seconds: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(epoch_seconds)),
        }
    }

    /// Jumps to an absolute time.
    pub fn set(&self, epoch_seconds: i64) {
        self.now.store(epoch_seconds, Ordering::SeqCst);
    }

    /// Moves time forward (or backward, for negative values).
    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
