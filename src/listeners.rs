//! Observer registries with per-listener failure isolation.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A set of listeners of type `T` (usually a `dyn Fn(..)`).
///
/// Notification works on a copy of the current registrations, so a listener
/// may add or remove listeners without deadlocking. A panicking listener is
/// logged and skipped; the remaining listeners still run.
pub struct ListenerRegistry<T: ?Sized> {
    name: &'static str,
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<T>)>>,
}

impl<T: ?Sized> ListenerRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<T>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke `call` for every listener. Returns the number of listeners that panicked.
    pub fn notify<F>(&self, call: F) -> usize
    where
        F: Fn(&T),
    {
        let snapshot: Vec<Arc<T>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut failures = 0;
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| call(&listener))).is_err() {
                failures += 1;
                tracing::error!("{} listener panicked; continuing with remaining listeners", self.name);
            }
        }
        failures
    }
}
