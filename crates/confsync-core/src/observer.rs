//! Observer registry for key-change notifications
//!
//! Observers learn of every applied key change regardless of origin: local
//! writes, peer broadcasts, storage-change events, lock toggles, and resets.
//! Notification is synchronous and in registration order; a panicking
//! observer is isolated so the rest of the pass still runs.
//!
//! Two observer shapes exist, chosen explicitly at registration time: a bare
//! callback and a capability object implementing [`ConfigObserver`].
//! Registration identity is the handle itself (`Arc` pointer identity), so
//! keep a clone of the [`Observer`] around if you intend to remove it later.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Capability-object shape of an observer
pub trait ConfigObserver: Send + Sync {
    /// Called with the key whose value or lock state changed
    fn on_config_change(&self, key: &str);
}

/// A registered change observer
#[derive(Clone)]
pub enum Observer {
    /// Plain callback invoked with the changed key
    Callback(Arc<dyn Fn(&str) + Send + Sync>),
    /// Capability object with a change method
    Handler(Arc<dyn ConfigObserver>),
}

impl Observer {
    /// Wrap a callback function as an observer
    pub fn callback(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Observer::Callback(Arc::new(f))
    }

    /// Wrap a capability object as an observer
    pub fn handler(h: Arc<dyn ConfigObserver>) -> Self {
        Observer::Handler(h)
    }

    fn ptr(&self) -> *const () {
        match self {
            Observer::Callback(f) => Arc::as_ptr(f) as *const (),
            Observer::Handler(h) => Arc::as_ptr(h) as *const (),
        }
    }

    /// Whether two observers are the same registration handle
    pub fn same(&self, other: &Observer) -> bool {
        std::ptr::eq(self.ptr(), other.ptr())
    }

    fn invoke(&self, key: &str) {
        match self {
            Observer::Callback(f) => f(key),
            Observer::Handler(h) => h.on_config_change(key),
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Observer::Callback(_) => "Callback",
            Observer::Handler(_) => "Handler",
        };
        write!(f, "Observer::{}({:p})", kind, self.ptr())
    }
}

/// Instance-scoped observer registry
///
/// Lives and dies with its owning store; there is no global observer state.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Observer>>,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; adding an already-registered handle is a no-op
    pub fn add(&self, observer: Observer) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|o| o.same(&observer)) {
            observers.push(observer);
        }
    }

    /// Remove an observer; removing an absent handle is a no-op
    pub fn remove(&self, observer: &Observer) {
        self.observers.lock().retain(|o| !o.same(observer));
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    /// Notify every observer of a change to `key`, in registration order
    ///
    /// Runs outside any state lock. A panicking observer is logged and
    /// skipped; it does not abort the pass or the triggering operation.
    pub fn notify(&self, key: &str) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.invoke(key))).is_err() {
                warn!(key, ?observer, "observer panicked during notification");
            }
        }
    }
}
