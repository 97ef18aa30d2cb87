//! The subscription list for provider events.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use keygate_session::IdpEvent;

/// Handle returned by [`TokenLifecycle::subscribe`](crate::TokenLifecycle::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Listener = Arc<dyn Fn(&IdpEvent) + Send + Sync>;

#[derive(Default)]
struct Entries {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

/// Ordered listener callbacks.
///
/// `notify` snapshots the list and calls listeners with the lock released,
/// so a listener may subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: Mutex<Entries>,
}

impl Listeners {
    pub(crate) fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let mut entries = self.lock();
        entries.next_id += 1;
        let id = SubscriptionId(entries.next_id);
        entries.listeners.push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.lock();
        let before = entries.listeners.len();
        entries.listeners.retain(|(existing, _)| *existing != id);
        entries.listeners.len() != before
    }

    pub(crate) fn notify(&self, event: &IdpEvent) -> usize {
        let snapshot: Vec<Listener> = self
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
