// crates/core/src/subscribers.rs
//! Handle-based callback registry used for progress and connection observers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Handles are unique across every set in the process, so a handle from one
/// set never removes an entry from another.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct SubscriberSet<T> {
    entries: RwLock<Vec<(Subscription, Callback<T>)>>,
}

impl<T: Clone> SubscriberSet<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(Subscription, Callback<T>)>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::error!("RwLock poisoned reading subscribers");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<(Subscription, Callback<T>)>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::error!("RwLock poisoned writing subscribers");
            poisoned.into_inner()
        })
    }

    pub fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let subscription = Subscription {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
        };
        self.write().push((subscription, Arc::new(callback)));
        subscription
    }

    /// Returns `false` when the handle was not registered here.
    pub fn remove(&self, subscription: Subscription) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|(s, _)| *s != subscription);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the current callbacks, taken so delivery never holds the lock.
    pub fn snapshot(&self) -> Vec<Callback<T>> {
        self.read().iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }

    /// Call every subscriber now. A panicking subscriber is logged and skipped.
    pub fn notify(&self, value: T) {
        for callback in self.snapshot() {
            invoke_isolated(&callback, value.clone());
        }
    }
}

impl<T: Clone> Default for SubscriberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one callback, containing any panic. Returns `false` if it panicked.
pub(crate) fn invoke_isolated<T>(callback: &Callback<T>, value: T) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback(value))) {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!("subscriber callback panicked; continuing with remaining subscribers");
            false
        }
    }
}
