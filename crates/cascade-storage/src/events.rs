//! Lifecycle event registry.
//!
//! The storage manager owns one registry and reports build lifecycle
//! progress through it. Listeners are called synchronously, in
//! registration order, from whichever task produced the event, so they
//! should hand anything slow off to a channel.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

/// Build lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// A load stage (`configs`, `indices`, `encoding`, `root`) began.
    LoadStageStarted { stage: &'static str },
    LoadStageCompleted { stage: &'static str },
    /// Progress within a stage, in completed units out of a known total.
    LoadProgress {
        stage: &'static str,
        done: usize,
        total: usize,
    },
    /// A new build generation became the active one.
    BuildSwapped { generation: u64, build: String },
    CachePurged,
}

/// Handle returned by [`EventRegistry::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

type Listener = Box<dyn Fn(&StorageEvent) + Send + Sync>;

/// Ordered listener registry.
#[derive(Default)]
pub struct EventRegistry {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: impl Fn(&StorageEvent) + Send + Sync + 'static) -> RegistrationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Box::new(listener)));
        RegistrationId(id)
    }

    /// Remove a listener; `false` if it was already gone.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id.0);
        listeners.len() != before
    }

    /// Dispatch an event to every listener in registration order.
    pub fn emit(&self, event: &StorageEvent) {
        trace!("Event: {:?}", event);
        for (_, listener) in self.listeners.lock().iter() {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn listeners_run_in_registration_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.register(move |_| seen.lock().push(tag));
        }

        registry.emit(&StorageEvent::CachePurged);
        assert_eq!(*seen.lock(), ["first", "second", "third"]);
    }

    #[test]
    fn unregister_removes_exactly_one_listener() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let a = registry.register(move |_| seen_a.lock().push("a"));
        let seen_b = Arc::clone(&seen);
        let _b = registry.register(move |_| seen_b.lock().push("b"));

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));

        registry.emit(&StorageEvent::CachePurged);
        assert_eq!(*seen.lock(), ["b"]);
        assert_eq!(registry.len(), 1);
    }
}
