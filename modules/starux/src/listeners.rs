//! Subscriber set.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::error;

use crate::state_ref::StateRef;

pub(crate) type Listener = Arc<dyn Fn(&StateRef) + Send + Sync>;

/// Registered listeners, delivered in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Listener>>,
}

impl Listeners {
    pub(crate) fn add(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(id, listener);
        Subscription {
            id,
            listeners: Arc::downgrade(self),
            active: AtomicBool::new(true),
        }
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `state` to everyone registered when the cycle starts.
    /// A panicking listener is logged and skipped; the rest still run.
    pub(crate) fn notify(&self, state: &StateRef) {
        let current: Vec<(u64, Listener)> = self
            .lock()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in current {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(state))) {
                error!(
                    listener_id = id,
                    panic = %panic_message(panic.as_ref()),
                    "Listener panicked during notification"
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Listener>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Returned by `Store::subscribe`. Dropping it does not unsubscribe.
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
    active: AtomicBool,
}

impl Subscription {
    /// Stop future deliveries. Only the first call does anything; it returns
    /// `true`, later calls return `false`.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter(hits: &Arc<AtomicUsize>) -> Listener {
        let hits = Arc::clone(hits);
        Arc::new(move |_: &StateRef| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let listeners = Arc::new(Listeners::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = listeners.add(counter(&hits));
        let state = StateRef::new(json!({}));

        listeners.notify(&state);
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        listeners.notify(&state);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn dropping_a_subscription_keeps_the_listener() {
        let listeners = Arc::new(Listeners::default());
        let hits = Arc::new(AtomicUsize::new(0));
        drop(listeners.add(counter(&hits)));
        listeners.notify(&StateRef::new(json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_the_rest() {
        let listeners = Arc::new(Listeners::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let _first = listeners.add(counter(&hits));
        let _boom = listeners.add(Arc::new(|_: &StateRef| panic!("listener failure")));
        let _last = listeners.add(counter(&hits));

        listeners.notify(&StateRef::new(json!({})));
        listeners.notify(&StateRef::new(json!({})));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn membership_changes_apply_to_the_next_cycle() {
        let listeners = Arc::new(Listeners::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let late = Arc::clone(&hits);
        let registry = Arc::downgrade(&listeners);
        let added = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&added);

        let _adder = listeners.add(Arc::new(move |_: &StateRef| {
            if let Some(registry) = registry.upgrade() {
                let hits = Arc::clone(&late);
                let sub = registry.add(Arc::new(move |_: &StateRef| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }));
                keep.lock().unwrap().push(sub);
            }
        }));

        let state = StateRef::new(json!({}));
        listeners.notify(&state);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        listeners.notify(&state);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(added.lock().unwrap().len(), 2);
    }
}
