//! Channel-driven event source standing in for the server's SSE endpoint.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use grid_sdk::transport::sse::{EventSource, EventStreamRequest, SseMessage, SseStream};
use grid_sdk::transport::TransportError;

/// An event source whose messages are pushed by the test (or the mock server).
///
/// Messages pushed before the client connects are buffered.
#[derive(Clone)]
pub struct MockEventSource {
    tx: mpsc::UnboundedSender<SseMessage>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<SseMessage>>>>,
    requests: Arc<Mutex<Vec<EventStreamRequest>>>,
}

impl MockEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Push a named event with a JSON payload.
    pub fn push(&self, event: &str, payload: Value) {
        self.push_raw(event, &payload.to_string());
    }

    /// Push a named event with arbitrary data, malformed or not.
    pub fn push_raw(&self, event: &str, data: &str) {
        let _ = self.tx.send(SseMessage::new(event, data));
    }

    pub fn requests(&self) -> Vec<EventStreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn connect(&self, request: EventStreamRequest) -> Result<SseStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Connection("mock event source already connected".into()))?;

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (Ok(message), rx))
        });
        Ok(stream.boxed())
    }
}
