use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::config::ClientConfig;
use crate::error::{GridError, Result};
use crate::transport::{HttpRequest, Transport};

/// Request plumbing shared by the session and every handle it creates.
///
/// Owns the session's [`EventBus`] and the task pumping the event stream
/// into it; the task is aborted when the last reference to the core drops.
pub(crate) struct ClientCore {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientCore {
    pub(crate) fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            bus: Arc::new(EventBus::new()),
            stream_task: Mutex::new(None),
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub(crate) fn set_stream_task(&self, task: JoinHandle<()>) {
        let previous = self
            .stream_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// `root_url/segment/segment...`. Segments must already be path-encoded.
    pub(crate) fn url(&self, segments: &[&str]) -> String {
        let mut url = self.config.root_url();
        for segment in segments {
            url.push('/');
            url.push_str(segment);
        }
        url
    }

    /// Send `request` with the session headers and decode the JSON response.
    ///
    /// Transport failures and non-2xx statuses become [`GridError::Request`]
    /// described by `operation`. An empty 2xx body decodes to `Value::Null`.
    pub(crate) async fn execute(&self, operation: &str, request: HttpRequest) -> Result<Value> {
        let request = request.with_headers(&self.config.headers);
        debug!(method = %request.method, url = %request.url, "sending grid request");

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(operation, error = %e, "grid request failed");
                return Err(GridError::unreachable(operation));
            }
        };

        if !response.is_success() {
            debug!(operation, status = response.status, "grid request rejected");
            return Err(GridError::Request {
                operation: operation.to_string(),
                status: Some(response.status),
                body: Some(response.body).filter(|b| !b.is_empty()),
            });
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| GridError::invalid_response(operation, e))
    }

    /// [`execute`](Self::execute) followed by a typed decode.
    pub(crate) async fn execute_as<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: HttpRequest,
    ) -> Result<T> {
        let value = self.execute(operation, request).await?;
        serde_json::from_value(value).map_err(|e| GridError::invalid_response(operation, e))
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        let task = self
            .stream_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}
