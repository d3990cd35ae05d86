//! Publish/subscribe table keyed by event kind.
//!
//! Used both by the session-wide [`EventBus`](super::EventBus) and by every
//! [`JobHandle`](crate::job::JobHandle). There is no listener cap.
//!
//! Dispatch snapshots the handlers under the lock and invokes them after it
//! is released, so a handler may add or remove listeners (including itself)
//! while it runs. A panicking handler is contained and logged; the remaining
//! handlers still receive the event.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use super::event_types::{JobEvent, JobEventKind};

/// Identifies one registered listener.
///
/// Ids are unique across every table in the process, so an id handed to the
/// wrong table matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Handler = Arc<dyn Fn(&JobEvent) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);

struct Listener {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
pub struct ListenerTable {
    listeners: Mutex<HashMap<JobEventKind, Vec<Listener>>>,
}

impl std::fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerTable")
            .field("listeners", &self.total())
            .finish()
    }
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobEventKind, Vec<Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, kind: JobEventKind, once: bool, handler: Handler) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(kind)
            .or_default()
            .push(Listener { id, once, handler });
        id
    }

    /// Register a repeatable listener.
    pub fn on<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.insert(kind, false, Arc::new(handler))
    }

    /// Register a listener that is removed before its first invocation.
    pub fn once<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.insert(kind, true, Arc::new(handler))
    }

    /// Remove one listener. Returns false if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        for entries in listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|l| l.id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove every listener for `kind`, or every listener when `None`.
    pub fn remove_all(&self, kind: Option<JobEventKind>) {
        let mut listeners = self.lock();
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    pub fn count(&self, kind: JobEventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Deliver `event` to the listeners of its kind, in registration order.
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &JobEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let mut listeners = self.lock();
            let Some(entries) = listeners.get_mut(&kind) else {
                return 0;
            };
            let handlers = entries.iter().map(|l| l.handler.clone()).collect();
            entries.retain(|l| !l.once);
            handlers
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = %kind, job_id = %event.job_id(), "job event listener panicked");
            }
        }
        handlers.len()
    }
}
