//! Server-Sent Events collaborator.
//!
//! [`EventSource`] opens one long-lived connection and yields named
//! [`SseMessage`]s. [`HttpEventSource`] is the default implementation over
//! `reqwest`; it parses the `text/event-stream` framing incrementally so
//! events split across network chunks are reassembled correctly.
//!
//! Reconnection is not attempted: when the stream ends or fails the caller
//! simply stops receiving messages.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tracing::{info, trace};

use super::TransportError;

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Event name (defaults to "message").
    pub event: String,
    /// Data payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
    /// Last event ID seen on the stream, if any.
    pub id: Option<String>,
    /// Retry timing hint from server.
    pub retry: Option<u64>,
}

impl SseMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
            retry: None,
        }
    }
}

pub type SseStream = BoxStream<'static, Result<SseMessage, TransportError>>;

/// Parameters for opening an event stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventStreamRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Event names of interest. Empty means every event.
    pub channels: Vec<String>,
}

impl EventStreamRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    fn wants(&self, event: &str) -> bool {
        self.channels.is_empty() || self.channels.iter().any(|c| c == event)
    }
}

/// Push-event collaborator: one connection, many named channels.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open the stream. Messages arrive in wire order.
    async fn connect(&self, request: EventStreamRequest) -> Result<SseStream, TransportError>;
}

// ============================================================================
// Incremental parser
// ============================================================================

/// Incremental `text/event-stream` parser.
///
/// Feed raw bytes as they arrive; complete messages are returned once their
/// terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data: Option<String>,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the messages it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }
        messages
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => self.last_event_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => trace!("Unknown SSE field: {}", field),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event_type = self.event_type.take();
        let data = self.data.take()?;
        Some(SseMessage {
            event: event_type
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_event_id.clone(),
            retry: self.retry,
        })
    }
}

// ============================================================================
// HTTP Event Source
// ============================================================================

/// Default [`EventSource`] backed by a streaming `reqwest` response.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: reqwest::Client,
}

impl HttpEventSource {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(1) // SSE typically uses a single connection
            .build()
            .map_err(|e| TransportError::Build(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self, request: EventStreamRequest) -> Result<SseStream, TransportError> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            TransportError::connection(format!("Failed to connect to SSE stream: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Connection(format!(
                "SSE endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        info!("Connected to SSE stream at {}", request.url);

        let bytes = response.bytes_stream().fuse().boxed();
        let state = (bytes, SseParser::new(), VecDeque::new(), request);

        let stream = futures::stream::unfold(
            state,
            |(mut bytes, mut parser, mut pending, request)| async move {
                loop {
                    if let Some(message) = pending.pop_front() {
                        return Some((Ok(message), (bytes, parser, pending, request)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            trace!("Received SSE chunk: {} bytes", chunk.len());
                            pending.extend(
                                parser
                                    .feed(&chunk)
                                    .into_iter()
                                    .filter(|m| request.wants(&m.event)),
                            );
                        }
                        Some(Err(e)) => {
                            let err = TransportError::connection(format!("Stream error: {}", e));
                            return Some((Err(err), (bytes, parser, pending, request)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
