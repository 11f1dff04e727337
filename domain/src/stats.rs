//! Push fan-out for visitor total changes.
//!
//! The counter itself lives in a [`crate::StatsRepository`]; this hub only
//! forwards the values the store returned to registered callbacks. The
//! counter never decreases, so values at or below the last forwarded total
//! are dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Callback = Box<dyn Fn(u64) + Send + 'static>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    last: u64,
    callbacks: BTreeMap<u64, Callback>,
}

/// Registry of visitor-total subscribers.
///
/// Callbacks run while the listener lock is held, so removing a subscription
/// waits for an in-flight publish to finish. A callback must not unsubscribe
/// itself.
#[derive(Clone, Default)]
pub struct VisitorFeed {
    inner: Arc<Mutex<Listeners>>,
}

impl VisitorFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback and deliver the current total to it before
    /// returning: `initial`, or the last published total if that is newer.
    pub fn subscribe<F>(&self, initial: u64, callback: F) -> Subscription
    where
        F: Fn(u64) + Send + 'static,
    {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.last = guard.last.max(initial);
        callback(guard.last);
        let id = guard.next_id;
        guard.next_id += 1;
        guard.callbacks.insert(id, Box::new(callback));
        Subscription {
            id,
            feed: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Deliver a new total to every current subscriber. Returns whether the
    /// value was newer than the last one forwarded.
    pub fn publish(&self, total: u64) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if total <= guard.last {
            return false;
        }
        guard.last = total;
        for cb in guard.callbacks.values() {
            cb(total);
        }
        true
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.callbacks.len(),
            Err(poisoned) => poisoned.into_inner().callbacks.len(),
        }
    }
}

/// Scoped subscription handle. Unsubscribes on [`Subscription::unsubscribe`]
/// or on drop; after either returns the callback is never invoked again.
pub struct Subscription {
    id: u64,
    feed: std::sync::Weak<Mutex<Listeners>>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(feed) = self.feed.upgrade() {
            let mut guard = match feed.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.callbacks.remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
