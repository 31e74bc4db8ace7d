//! Event Dispatcher
//!
//! Fans every [`ConnectionEvent`] out to all registered listeners.
//!
//! - Listeners run in registration order.
//! - The listener list is snapshotted before iterating: a listener added or
//!   removed while an event is being delivered does not change who receives
//!   that event.
//! - No lock is held while a listener runs, so listeners may subscribe or
//!   unsubscribe (themselves included) from inside the callback.
//! - A panicking listener is logged and skipped; the rest still run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::domain::event::ConnectionEvent;
use crate::infrastructure::metrics;

/// Callback invoked for every dispatched event.
pub type Listener = dyn Fn(&ConnectionEvent) + Send + Sync;

/// Identity of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<Listener>)>,
}

impl Registry {
    fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }
}

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub failed: usize,
}

/// Listener registry with snapshot fan-out.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until its handle unsubscribes.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let (id, count) = {
            let mut registry = self.registry.lock();
            let id = ListenerId(registry.next_id);
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            (id, registry.listeners.len())
        };

        metrics::set_listener_count(count);
        tracing::trace!(listener = %id, listeners = count, "Listener registered");

        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    /// Deliver `event` to every listener registered right now.
    pub fn dispatch(&self, event: &ConnectionEvent) -> DispatchReport {
        let snapshot: Vec<(ListenerId, Arc<Listener>)> = self.registry.lock().listeners.clone();
        let mut report = DispatchReport::default();

        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.failed += 1;
                    metrics::record_listener_panic();
                    tracing::error!(
                        listener = %id,
                        event = event.kind(),
                        panic = %panic_message(payload.as_ref()),
                        "Listener panicked during dispatch"
                    );
                }
            }
        }

        report
    }
}

/// Handle returned by [`Dispatcher::subscribe`].
///
/// Dropping the handle does NOT unsubscribe; call [`ListenerHandle::unsubscribe`].
#[derive(Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    registry: Weak<Mutex<Registry>>,
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl ListenerHandle {
    /// The listener's id.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };

        let (removed, count) = {
            let mut registry = registry.lock();
            let removed = registry.remove(self.id);
            (removed, registry.listeners.len())
        };

        if removed {
            metrics::set_listener_count(count);
            tracing::trace!(listener = %self.id, listeners = count, "Listener removed");
        }
        removed
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry.upgrade().is_some_and(|registry| {
            registry
                .lock()
                .listeners
                .iter()
                .any(|(id, _)| *id == self.id)
        })
    }
}

/// Unsubscribes its listener when dropped.
#[derive(Debug)]
pub struct ListenerGuard(ListenerHandle);

impl ListenerGuard {
    /// Take ownership of `handle`.
    #[must_use]
    pub const fn new(handle: ListenerHandle) -> Self {
        Self(handle)
    }

    /// The guarded handle.
    #[must_use]
    pub const fn handle(&self) -> &ListenerHandle {
        &self.0
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
