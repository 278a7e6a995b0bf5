//! Observable state cells
//!
//! A `StateAtom` holds a single value that plugin logic replaces wholesale
//! and UI bindings observe. Values are never mutated in place; `update`
//! works on a scratch clone and commits through the same path as `set`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub(crate) struct AtomShared<T> {
    value: Mutex<T>,
    subscribers: Mutex<Vec<(u64, Observer<T>)>>,
    next_subscriber: AtomicU64,
}

impl<T> AtomShared<T> {
    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.lock().unwrap())
    }
}

/// A single observable value cell.
///
/// Handles are cheap to clone; all clones share the same underlying value
/// and subscriber list.
pub struct StateAtom<T> {
    shared: Arc<AtomShared<T>>,
}

impl<T> std::fmt::Debug for StateAtom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateAtom").finish_non_exhaustive()
    }
}

impl<T> Clone for StateAtom<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + PartialEq> StateAtom<T> {
    /// Create a standalone atom with an initial value
    pub fn new(initial: T) -> Self {
        Self {
            shared: Arc::new(AtomShared {
                value: Mutex::new(initial),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Return a clone of the current value
    pub fn get(&self) -> T {
        self.shared.value.lock().unwrap().clone()
    }

    /// Replace the current value.
    ///
    /// Subscribers are notified synchronously, in registration order, before
    /// this returns. Setting a value equal to the current one notifies
    /// nobody.
    pub fn set(&self, value: T) {
        {
            let mut current = self.shared.value.lock().unwrap();
            if *current == value {
                return;
            }
            *current = value.clone();
        }
        self.notify(&value);
    }

    /// Apply a mutation to a scratch copy of the current value and commit
    /// the result through `set`.
    ///
    /// The draft passed to `mutate` is discarded if it ends up equal to the
    /// current value, so the change-detection rules of `set` apply here too.
    pub fn update(&self, mutate: impl FnOnce(&mut T)) {
        let mut draft = self.get();
        mutate(&mut draft);
        self.set(draft);
    }

    /// Register an observer for value changes.
    ///
    /// Returns a capability to deregister. Dropping the returned handle
    /// leaves the subscription active.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .lock()
            .unwrap()
            .push((id, Arc::new(observer)));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().unwrap().len()
    }

    // Observers run against a snapshot of the subscriber list taken outside
    // the value lock, so an observer may freely get, set, or unsubscribe.
    fn notify(&self, value: &T) {
        let observers: Vec<Observer<T>> = {
            let subscribers = self.shared.subscribers.lock().unwrap();
            subscribers.iter().map(|(_, o)| Arc::clone(o)).collect()
        };
        for observer in observers {
            observer(value);
        }
    }

    pub(crate) fn shared(&self) -> Arc<AtomShared<T>> {
        Arc::clone(&self.shared)
    }
}

/// Capability to remove a subscription from its atom
pub struct Subscription<T> {
    shared: Weak<AtomShared<T>>,
    id: u64,
}

impl<T> Subscription<T> {
    /// Deregister the observer. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .subscribers
                .lock()
                .unwrap()
                .retain(|(id, _)| *id != self.id);
        }
    }
}
