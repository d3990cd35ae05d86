//! In-crate fakes for the transport and event source collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::transport::sse::{EventSource, EventStreamRequest, SseMessage, SseStream};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};

/// Transport answering from a route table keyed by method and full URL.
///
/// The most recent registration for a route wins. Unknown routes answer 404.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    routes: Arc<Mutex<Vec<(Method, String, Result<HttpResponse, TransportError>)>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, method: Method, url: &str, response: HttpResponse) {
        self.routes
            .lock()
            .unwrap()
            .push((method, url.to_string(), Ok(response)));
    }

    pub(crate) fn fail(&self, method: Method, url: &str, error: TransportError) {
        self.routes
            .lock()
            .unwrap()
            .push((method, url.to_string(), Err(error)));
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, method: Method, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let answer = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(method, url, _)| *method == request.method && *url == request.url)
            .map(|(_, _, answer)| answer.clone())
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "")));
        self.requests.lock().unwrap().push(request);
        answer
    }
}

/// Event source fed by hand through [`push`](Self::push).
///
/// Supports one connection; messages pushed before `connect` are buffered.
#[derive(Clone)]
pub(crate) struct ChannelEventSource {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<SseMessage>>>>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<SseMessage>>>>,
    requests: Arc<Mutex<Vec<EventStreamRequest>>>,
}

impl ChannelEventSource {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(Mutex::new(Some(rx))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn push(&self, event: &str, data: &str) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(SseMessage::new(event, data));
        }
    }

    /// End the stream once buffered messages are consumed.
    pub(crate) fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    pub(crate) fn requests(&self) -> Vec<EventStreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn connect(&self, request: EventStreamRequest) -> Result<SseStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Connection("already connected".to_string()))?;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (Ok(message), rx))
        });
        Ok(stream.boxed())
    }
}
