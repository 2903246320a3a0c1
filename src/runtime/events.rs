//! Observer registry used by every component to publish state changes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_id: AtomicU64,
    by_id: Mutex<BTreeMap<u64, Listener<E>>>,
}

/// A synchronous multi-listener event bus.
///
/// Listeners run on the emitting task, in subscription order, after the
/// emitter has released its own state.
pub struct EventBus<E> {
    inner: Arc<Listeners<E>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Listeners {
                next_id: AtomicU64::new(0),
                by_id: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register `callback`. It stays registered until the returned
    /// `Subscription` is unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
        E: 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .by_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(callback));

        let weak: Weak<Listeners<E>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners
                        .by_id
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&id);
                }
            })),
        }
    }

    /// Deliver `event` to every current listener.
    pub fn emit(&self, event: &E) {
        // Snapshot so listeners may subscribe/unsubscribe while being notified.
        let listeners: Vec<Listener<E>> = self
            .inner
            .by_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .by_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `EventBus::subscribe`.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Stop receiving events.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_listeners_until_unsubscribed() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let first = bus.subscribe(move |e| s1.lock().unwrap().push(("a", *e)));
        let s2 = seen.clone();
        let _second = bus.subscribe(move |e| s2.lock().unwrap().push(("b", *e)));

        bus.emit(&1);
        first.unsubscribe();
        bus.emit(&2);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 1), ("b", 1), ("b", 2)]);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped_is_harmless() {
        let bus: EventBus<()> = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        sub.unsubscribe();
    }
}
