//! Refresh notifications.
//!
//! Collaborators such as cached-query invalidation register a zero-argument
//! callback and are told every time a refresh replaces the credential pair.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Callback invoked after a refresh persists a new credential pair.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, RefreshCallback)>>,
}

/// The set of registered refresh callbacks.
#[derive(Clone, Default)]
pub struct SubscriberSet {
    registry: Arc<Registry>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. It stays registered until the returned
    /// [`Subscription`] is explicitly unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.entries.write().push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback once.
    ///
    /// The list is copied first so callbacks may (un)subscribe. A panicking
    /// callback is logged and does not stop the others.
    pub fn notify(&self) {
        let callbacks: Vec<RefreshCallback> = self
            .registry
            .entries
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                tracing::warn!("Credential refresh subscriber panicked");
            }
        }
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.len())
            .finish()
    }
}

/// Handle returned by [`SubscriberSet::subscribe`].
///
/// Dropping it does not unsubscribe.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the callback. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut entries = registry.entries.write();
        let before = entries.len();
        entries.retain(|(id, _)| *id != self.id);
        entries.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_reaches_every_subscriber_once() {
        let set = SubscriberSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _a = {
            let hits = hits.clone();
            set.subscribe(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _b = {
            let hits = hits.clone();
            set.subscribe(move || {
                hits.fetch_add(10, Ordering::SeqCst);
            })
        };

        set.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_unsubscribe() {
        let set = SubscriberSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = {
            let hits = hits.clone();
            set.subscribe(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(set.len(), 1);

        assert!(sub.unsubscribe());
        set.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let set = SubscriberSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = set.subscribe(|| panic!("boom"));
        let _good = {
            let hits = hits.clone();
            set.subscribe(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        set.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
