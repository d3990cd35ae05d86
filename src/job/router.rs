use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::trace;

use super::id::JobId;
use crate::bus::{EventBus, JobEvent, JobEventKind, ListenerId, ListenerTable};

/// Terminal bookkeeping shared by the six subscriptions of one router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    /// A terminal event was forwarded; only its matching `Completed` may follow.
    Terminal { success: bool },
    Closed,
}

impl Gate {
    /// Whether `event` may be forwarded, advancing the gate if so.
    fn admit(&mut self, event: &JobEvent) -> bool {
        match (*self, event) {
            (Gate::Open, JobEvent::Succeeded { .. }) => {
                *self = Gate::Terminal { success: true };
                true
            }
            (Gate::Open, JobEvent::Failed { .. }) => {
                *self = Gate::Terminal { success: false };
                true
            }
            (_, JobEvent::Succeeded { .. } | JobEvent::Failed { .. }) => false,
            (Gate::Terminal { success }, JobEvent::Completed { success: s, .. }) if success == *s => {
                *self = Gate::Closed;
                true
            }
            (_, JobEvent::Completed { .. }) => false,
            _ => true,
        }
    }
}

/// Filters the session bus down to one job's events.
///
/// Subscribes to every event kind exactly once and forwards matching events,
/// unbuffered, into the job's own listener table. At most one terminal event
/// (and its `Completed`) is forwarded per job. Subscriptions are removed from
/// the bus when the router is dropped.
pub(crate) struct JobEventRouter {
    bus: Arc<EventBus>,
    subscriptions: Vec<ListenerId>,
}

impl JobEventRouter {
    pub(crate) fn attach(bus: Arc<EventBus>, job_id: JobId, target: &Arc<ListenerTable>) -> Self {
        let gate = Arc::new(Mutex::new(Gate::Open));
        let target: Weak<ListenerTable> = Arc::downgrade(target);

        let subscriptions = JobEventKind::ALL
            .into_iter()
            .map(|kind| {
                let job_id = job_id.clone();
                let target = target.clone();
                let gate = gate.clone();
                bus.route(kind, move |event| {
                    if event.job_id() != &job_id {
                        return;
                    }
                    let admitted = gate
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .admit(event);
                    if !admitted {
                        trace!(job_id = %job_id, event = %kind, "suppressing duplicate terminal event");
                        return;
                    }
                    if let Some(target) = target.upgrade() {
                        target.emit(event);
                    }
                })
            })
            .collect();

        Self { bus, subscriptions }
    }
}

impl Drop for JobEventRouter {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unroute(id);
        }
    }
}
