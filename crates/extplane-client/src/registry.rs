//! Per-dataref listener registry.
//!
//! Listeners are registered for an exact dataref name and are called by the
//! receive loop after the store has published a new snapshot. Notification
//! takes a snapshot of the listener list first, so listeners can be added or
//! removed (including from inside a listener) while a notification pass is
//! running.
//!
//! Listeners run on the receive loop's task. A slow listener delays
//! processing of every subsequent inbound line; listeners that need to do
//! real work should hand the snapshot off to their own task.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use extplane_core::{DataRef, Error};

/// Callback invoked with the new snapshot whenever a dataref updates.
///
/// Implemented for every `Fn(&DataRef) + Send + Sync`, so closures can be
/// registered directly.
pub trait DataRefListener: Send + Sync + 'static {
    fn on_update(&self, dataref: &DataRef);
}

impl<F> DataRefListener for F
where
    F: Fn(&DataRef) + Send + Sync + 'static,
{
    fn on_update(&self, dataref: &DataRef) {
        self(dataref)
    }
}

/// Identity of a registration, returned by [`NotificationRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Registration = (ListenerId, Arc<dyn DataRefListener>);

/// Mapping from dataref name to its registered listeners.
#[derive(Default)]
pub struct NotificationRegistry {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<String, Vec<Registration>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for updates of `name`.
    ///
    /// The same listener may be registered several times; each registration
    /// gets its own id and is notified separately.
    pub fn register<L: DataRefListener>(&self, name: &str, listener: L) -> ListenerId {
        self.register_arc(name, Arc::new(listener))
    }

    /// Register an already shared listener.
    pub fn register_arc(&self, name: &str, listener: Arc<dyn DataRefListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write()
            .entry(name.to_string())
            .or_default()
            .push((id, listener));
        tracing::trace!(dataref = %name, listener = %id, "Listener registered");
        id
    }

    /// Remove a registration. Returns `false` if it was not registered
    /// for `name`.
    pub fn unregister(&self, name: &str, id: ListenerId) -> bool {
        let mut listeners = self.write();
        let Some(list) = listeners.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(name);
        }
        if removed {
            tracing::trace!(dataref = %name, listener = %id, "Listener unregistered");
        }
        removed
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.read().get(name).map_or(0, Vec::len)
    }

    /// Deliver `dataref` to every listener registered for its exact name.
    ///
    /// A listener that panics is logged and skipped; the remaining listeners
    /// still run. Returns the number of listeners that completed normally.
    pub fn notify(&self, dataref: &DataRef) -> usize {
        let snapshot: Vec<Registration> = match self.read().get(&dataref.name) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, listener) in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_update(dataref)));
            match result {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let err = Error::Listener(panic_message(payload.as_ref()));
                    tracing::error!(
                        dataref = %dataref.name,
                        listener = %id,
                        error = %err,
                        "Listener panicked during notification"
                    );
                }
            }
        }
        delivered
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Registration>>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Registration>>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<String, usize> = self
            .read()
            .iter()
            .map(|(name, list)| (name.clone(), list.len()))
            .collect();
        f.debug_struct("NotificationRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn snapshot(name: &str, value: &str) -> DataRef {
        DataRef {
            values: Some(vec![value.to_string()]),
            ..DataRef::new(name)
        }
    }

    fn failing_listener(_: &DataRef) {
        panic!("listener failure");
    }

    #[test]
    fn notify_without_listeners() {
        let registry = NotificationRegistry::new();
        assert_eq!(registry.notify(&snapshot("sim/x", "1")), 0);
    }

    #[test]
    fn registered_listener_receives_value() {
        let registry = NotificationRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        registry.register("sim/x", move |dr: &DataRef| {
            seen_clone
                .lock()
                .unwrap()
                .push(dr.first_value().unwrap_or_default().to_string());
        });

        assert_eq!(registry.notify(&snapshot("sim/x", "42")), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["42"]);
    }

    #[test]
    fn exact_name_matching_only() {
        let registry = NotificationRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        registry.register("sim/x", move |_: &DataRef| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&snapshot("sim/x/y", "1"));
        registry.notify(&snapshot("sim/", "1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        registry.notify(&snapshot("sim/x", "1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_stops_delivery() {
        let registry = NotificationRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = registry.register("sim/x", move |_: &DataRef| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.unregister("sim/x", id));
        assert_eq!(registry.listener_count("sim/x"), 0);
        registry.notify(&snapshot("sim/x", "1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unregister_unknown_returns_false() {
        let registry = NotificationRegistry::new();
        let id = registry.register("sim/x", |_: &DataRef| {});
        assert!(!registry.unregister("sim/y", id));
        assert!(registry.unregister("sim/x", id));
        assert!(!registry.unregister("sim/x", id));
    }

    #[test]
    fn multiple_listeners_same_name() {
        let registry = NotificationRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            registry.register("sim/x", move |_: &DataRef| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(registry.listener_count("sim/x"), 3);
        assert_eq!(registry.notify(&snapshot("sim/x", "1")), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn same_listener_registered_twice_is_removed_by_id() {
        let registry = NotificationRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let listener: Arc<dyn DataRefListener> = Arc::new(move |_: &DataRef| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let first = registry.register_arc("sim/x", Arc::clone(&listener));
        let second = registry.register_arc("sim/x", listener);
        assert_ne!(first, second);

        registry.unregister("sim/x", first);
        registry.notify(&snapshot("sim/x", "1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = NotificationRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        registry.register("sim/x", move |_: &DataRef| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        registry.register("sim/x", failing_listener);
        let c2 = Arc::clone(&count);
        registry.register("sim/x", move |_: &DataRef| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.notify(&snapshot("sim/x", "1")), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_can_unregister_itself_during_notify() {
        let registry = Arc::new(NotificationRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let own_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let own = Arc::clone(&own_id);
        let c = Arc::clone(&count);
        let id = registry.register("sim/x", move |dr: &DataRef| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *own.lock().unwrap() {
                reg.unregister(&dr.name, id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        registry.notify(&snapshot("sim/x", "1"));
        registry.notify(&snapshot("sim/x", "2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_ids_are_unique() {
        let registry = NotificationRegistry::new();
        let a = registry.register("sim/a", |_: &DataRef| {});
        let b = registry.register("sim/b", |_: &DataRef| {});
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("listener-"));
    }

    #[test]
    fn panic_message_extraction() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(p.as_ref()), "static str");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(p.as_ref()), "listener panicked");
    }
}
