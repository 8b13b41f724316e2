//! Synchronous listener registry with unsubscribe handles.
//!
//! Listeners run in registration order on the emitting thread. A panicking
//! listener is logged and skipped; it never reaches the emitter or the
//! remaining listeners.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, Callback<T>>>,
}

/// A set of `Fn(&T)` callbacks.
pub struct ListenerSet<T> {
    name: &'static str,
    inner: Arc<Inner<T>>,
}

impl<T: 'static> ListenerSet<T> {
    /// `name` only shows up in log lines.
    pub fn new(name: &'static str) -> Self {
        ListenerSet {
            name,
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(callback));

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut map = match inner.callbacks.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    map.remove(&id);
                }
            })),
        }
    }

    /// Invoke every listener with `value`.
    ///
    /// The callback list is copied before dispatch so listeners may
    /// subscribe or unsubscribe from inside a callback.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self.lock().values().cloned().collect();
        for callback in callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| callback(value)));
            if result.is_err() {
                error!(listeners = self.name, "listener panicked; continuing");
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Callback<T>>> {
        match self.inner.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: 'static> std::fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("name", &self.name)
            .field("listeners", &self.len())
            .finish()
    }
}

/// Handle returned by [`ListenerSet::subscribe`].
///
/// Dropping it does NOT unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
