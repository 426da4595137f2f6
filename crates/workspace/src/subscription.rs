//! Synchronous change observers.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::coordinator::StateChange;

type Callback = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicUsize,
    callbacks: Mutex<Vec<(usize, Callback)>>,
}

impl ObserverRegistry {
    pub(crate) fn register(
        self: &Arc<Self>,
        callback: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Some(Arc::downgrade(self)),
        }
    }

    /// Invoke every registered callback. Callbacks run outside the registry
    /// lock so they may register or drop subscriptions themselves.
    pub(crate) fn emit(&self, change: &StateChange) {
        let callbacks: Vec<Callback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(change);
        }
    }

    fn unregister(&self, id: usize) {
        self.callbacks.lock().retain(|(existing, _)| *existing != id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.callbacks.lock().len()
    }
}

/// Keeps an observer registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: usize,
    registry: Option<Weak<ObserverRegistry>>,
}

impl Subscription {
    /// Keep the observer registered for the lifetime of the coordinator.
    pub fn detach(mut self) {
        self.registry.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unregister(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
