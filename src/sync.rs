use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every structure guarded in this crate is consistent between statements,
/// so a poisoned lock still holds usable data.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A thread-safe set of listeners.
///
/// Notification iterates over a copy of the set taken under the lock, so
/// listeners may register or unregister (even themselves) from inside a
/// callback without deadlocking or invalidating the iteration.
pub struct Listeners<L: ?Sized> {
    inner: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Listeners<L> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Registering the same listener twice is a no-op.
    pub fn add(&self, listener: Arc<L>) {
        let mut listeners = lock(&self.inner);
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = lock(&self.inner);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    /// Call `f` for every listener registered at the time of the call.
    pub fn notify(&self, mut f: impl FnMut(&L)) {
        let snapshot = lock(&self.inner).clone();
        for listener in &snapshot {
            f(listener);
        }
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for Listeners<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    #[derive(Default)]
    struct Hits(AtomicUsize);

    impl Counter for Hits {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_is_idempotent_and_remove_reports() {
        let listeners: Listeners<dyn Counter> = Listeners::new();
        let hits = Arc::new(Hits::default());
        let as_dyn: Arc<dyn Counter> = hits.clone();

        listeners.add(as_dyn.clone());
        listeners.add(as_dyn.clone());
        assert_eq!(listeners.len(), 1);

        listeners.notify(|l| l.hit());
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);

        assert!(listeners.remove(&as_dyn));
        assert!(!listeners.remove(&as_dyn));
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_listener_can_unregister_during_notify() {
        struct SelfRemoving {
            set: Arc<Listeners<dyn Counter>>,
            me: Mutex<Option<Arc<dyn Counter>>>,
        }

        impl Counter for SelfRemoving {
            fn hit(&self) {
                if let Some(me) = lock(&self.me).take() {
                    self.set.remove(&me);
                }
            }
        }

        let set: Arc<Listeners<dyn Counter>> = Arc::new(Listeners::new());
        let listener = Arc::new(SelfRemoving {
            set: set.clone(),
            me: Mutex::new(None),
        });
        let as_dyn: Arc<dyn Counter> = listener.clone();
        *lock(&listener.me) = Some(as_dyn.clone());
        set.add(as_dyn);

        set.notify(|l| l.hit());
        assert!(set.is_empty());
    }
}
