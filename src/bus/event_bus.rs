use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use super::event_types::{JobEvent, JobEventKind};
use super::listeners::{ListenerId, ListenerTable};
use crate::transport::sse::{EventSource, EventStreamRequest};

const WATCH_CAPACITY: usize = 1024;

/// Session-wide demultiplexer for the job event stream.
///
/// Raw messages are decoded into [`JobEvent`]s and delivered to listeners in
/// wire order. A `Succeeded` or `Failed` event is always followed, within
/// the same dispatch, by a synthesized `Completed` event. Messages that fail
/// to decode are dropped.
///
/// Job routes live in their own table so that removing session listeners
/// never detaches a job handle.
pub struct EventBus {
    listeners: ListenerTable,
    routes: ListenerTable,
    tx: broadcast::Sender<JobEvent>,
    stream_ended: watch::Sender<bool>,
    dispatched: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.total())
            .field("routes", &self.routes.total())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            listeners: ListenerTable::new(),
            routes: ListenerTable::new(),
            tx,
            stream_ended: watch::Sender::new(false),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Open the event stream and pump it into this bus on a background task.
    ///
    /// The task ends when the stream ends; it does not reconnect.
    pub fn attach(
        self: &Arc<Self>,
        source: Arc<dyn EventSource>,
        request: EventStreamRequest,
    ) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let url = request.url.clone();
            let mut stream = match source.connect(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to open job event stream at {}: {}", url, e);
                    bus.stream_ended.send_replace(true);
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                match item {
                    Ok(message) => bus.dispatch_raw(&message.event, &message.data),
                    Err(e) => warn!("Job event stream error: {}", e),
                }
            }

            info!("Job event stream at {} closed", url);
            bus.stream_ended.send_replace(true);
        })
    }

    /// Decode and dispatch one raw server message.
    ///
    /// Unknown channels and undecodable payloads are dropped.
    pub fn dispatch_raw(&self, channel: &str, data: &str) {
        let Some(kind) = JobEventKind::from_wire_channel(channel) else {
            trace!("Ignoring event on channel '{}'", channel);
            return;
        };

        match JobEvent::from_wire(kind, data) {
            Ok(event) => self.dispatch(event),
            Err(e) => trace!("Dropping malformed '{}' event: {}", channel, e),
        }
    }

    /// Deliver a decoded event, followed by its derived completion if terminal.
    pub fn dispatch(&self, event: JobEvent) {
        let completion = event.derived_completion();
        self.publish(event);
        if let Some(completion) = completion {
            self.publish(completion);
        }
    }

    fn publish(&self, event: JobEvent) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.routes.emit(&event);
        self.listeners.emit(&event);
        // No receivers is the common case.
        let _ = self.tx.send(event);
    }

    pub fn on<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.listeners.on(kind, handler)
    }

    pub fn once<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.listeners.once(kind, handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn remove_all_listeners(&self, kind: Option<JobEventKind>) {
        self.listeners.remove_all(kind)
    }

    pub fn listener_count(&self, kind: JobEventKind) -> usize {
        self.listeners.count(kind)
    }

    pub(crate) fn route<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.routes.on(kind, handler)
    }

    pub(crate) fn unroute(&self, id: ListenerId) -> bool {
        self.routes.remove(id)
    }

    pub(crate) fn route_count(&self, kind: JobEventKind) -> usize {
        self.routes.count(kind)
    }

    /// Get a receiver for every event this bus dispatches.
    pub fn watch(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Resolves once the attached stream has ended or failed to open.
    ///
    /// Every event read before the end has already been dispatched.
    pub async fn stream_closed(&self) {
        let mut ended = self.stream_ended.subscribe();
        let _ = ended.wait_for(|ended| *ended).await;
    }

    pub fn stream_has_ended(&self) -> bool {
        *self.stream_ended.borrow()
    }

    /// Number of events dispatched so far, derived ones included.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
