// ── Listener registry ──
//
// Set-per-kind callback storage. Dispatch snapshots the target list
// before calling out so callbacks may add or remove listeners freely,
// and a panicking callback never stops delivery to the others.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, trace};

use crate::event::{EventKind, StationEvent};

type Callback = dyn Fn(&StationEvent) + Send + Sync;

/// A registered callback. Identity is the allocation: clones of one
/// `Listener` are equal, two listeners wrapping identical closures are not.
#[derive(Clone)]
pub struct Listener(Arc<Callback>);

impl Listener {
    pub fn new(callback: impl Fn(&StationEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&Arc::as_ptr(&self.0)).finish()
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

impl ListenerRegistry {
    /// Register `listener` under `kind`. Returns `false` if it was already there.
    pub(crate) fn add(&self, kind: EventKind, listener: Listener) -> bool {
        let mut map = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = map.entry(kind).or_default();
        if entry.contains(&listener) {
            return false;
        }
        entry.push(listener);
        true
    }

    /// Deregister `listener`. Returns `false` if it was not registered.
    pub(crate) fn remove(&self, kind: &EventKind, listener: &Listener) -> bool {
        let mut map = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = map.get_mut(kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| l != listener);
        let removed = entry.len() != before;
        if entry.is_empty() {
            map.remove(kind);
        }
        removed
    }

    pub(crate) fn len(&self, kind: &EventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .map_or(0, Vec::len)
    }

    /// Call every listener registered under `kind`, in registration order.
    pub(crate) fn dispatch(&self, kind: &EventKind, event: &StationEvent) {
        let targets = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() {
            return;
        }
        trace!(event = %kind, listeners = targets.len(), "dispatching");

        for listener in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (listener.0)(event)));
            if outcome.is_err() {
                error!(event = %kind, "listener panicked, continuing with the rest");
            }
        }
    }
}
