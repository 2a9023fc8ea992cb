//! Ordered, synchronous callback registry.
//!
//! Both the transport adapter's connection-notification stream and the
//! server's client-connected event are built on [`Observers`]. Delivery runs
//! on the notifying thread in subscription order, and callbacks execute
//! outside the internal lock so they may subscribe or unsubscribe freely.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::ids::SubscriptionId;

/// A subscriber callback.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Registry mapping subscription handles to callbacks.
pub struct Observers<E> {
    next_id: AtomicU64,
    callbacks: RwLock<BTreeMap<SubscriptionId, Callback<E>>>,
}

impl<E> Observers<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a callback. Later subscribers are notified after earlier ones.
    pub fn subscribe(&self, callback: Callback<E>) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.callbacks.write().insert(id, callback);
        id
    }

    /// Remove a callback. Returns `false` if the handle was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.write().remove(&id).is_some()
    }

    /// Deliver `event` to every current subscriber, returning how many ran.
    pub fn notify(&self, event: &E) -> usize {
        let snapshot: Vec<Callback<E>> = self.callbacks.read().values().cloned().collect();
        for callback in &snapshot {
            callback(event);
        }
        snapshot.len()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Drop every callback.
    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.len())
            .finish()
    }
}
