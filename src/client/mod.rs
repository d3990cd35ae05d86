//! The client session: configuration, the shared event bus, and the entry
//! points for services and jobs.

mod shared;
mod listing;

pub(crate) use shared::ClientCore;
pub use listing::{JobList, JobListOptions, JobSearch, JobSort, JobTotals};

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::bus::{JobEvent, JobEventKind, ListenerId};
use crate::catalog::ServiceHandle;
use crate::config::{ClientConfig, EventHeaderMode, JOBS_PATH, JOB_SEARCH_PATH, SERVICES_PATH};
use crate::error::{GridError, Result};
use crate::job::{JobCallbacks, JobHandle, JobId};
use crate::transport::sse::{EventSource, EventStreamRequest, HttpEventSource};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};

const SERVICES_OPERATION: &str = "Error requesting services";
const JOBS_OPERATION: &str = "Error requesting jobs";
const SEARCH_OPERATION: &str = "Error searching jobs";

#[derive(Deserialize)]
struct ServiceList {
    #[serde(default)]
    services: Vec<ServiceSummary>,
}

#[derive(Deserialize)]
struct ServiceSummary {
    name: String,
}

/// One session with a Grid server.
///
/// Opens the job event stream on construction and keeps it for the lifetime
/// of the session. Clones share the session; the stream is closed when the
/// last clone and every handle created from it are dropped.
///
/// Session-scope events use the prefixed names (`JobStarted`); job handles
/// use the bare names (`Started`). Both map onto [`JobEventKind`].
#[derive(Clone)]
pub struct GridClient {
    core: Arc<ClientCore>,
}

impl fmt::Debug for GridClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridClient")
            .field("root_url", &self.core.config().root_url())
            .field("bus", self.core.bus())
            .finish()
    }
}

impl GridClient {
    /// Connect with the default reqwest-backed transport and event source.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.request_timeout())
            .map_err(|e| GridError::Config(e.to_string()))?;
        let events = HttpEventSource::new().map_err(|e| GridError::Config(e.to_string()))?;
        Self::with_collaborators(config, Arc::new(transport), Arc::new(events))
    }

    /// Connect with caller-supplied collaborators.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_collaborators(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSource>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| {
            GridError::Config("GridClient must be created inside a tokio runtime".to_string())
        })?;

        let mut request = EventStreamRequest::new(config.events_url())
            .with_channels(JobEventKind::WIRE.map(JobEventKind::session_name));
        if config.event_header_mode == EventHeaderMode::Headers {
            request.headers = config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }

        info!(url = %request.url, header_mode = %config.event_header_mode, "opening job event stream");

        let core = Arc::new(ClientCore::new(config, transport));
        let task = core.bus().attach(events, request);
        core.set_stream_task(task);

        Ok(Self { core })
    }

    pub fn config(&self) -> &ClientConfig {
        self.core.config()
    }

    /// Handles for every service on the server.
    pub async fn services(&self) -> Result<Vec<ServiceHandle>> {
        let list: ServiceList = self
            .core
            .execute_as(SERVICES_OPERATION, HttpRequest::get(self.core.url(&[SERVICES_PATH])))
            .await?;

        Ok(list
            .services
            .into_iter()
            .map(|s| ServiceHandle::new(self.core.clone(), s.name))
            .collect())
    }

    /// Handle for one service. No request is made.
    pub fn service(&self, name: &str) -> ServiceHandle {
        ServiceHandle::new(self.core.clone(), name)
    }

    /// Handle for an existing job. No request is made.
    pub fn job(&self, id: impl Into<JobId>) -> JobHandle {
        self.job_with_callbacks(id, JobCallbacks::new())
    }

    pub fn job_with_callbacks(&self, id: impl Into<JobId>, callbacks: JobCallbacks) -> JobHandle {
        JobHandle::new(self.core.clone(), id.into(), callbacks)
    }

    /// Handles for the jobs matching `options`, in server order.
    pub async fn jobs(&self, options: &JobListOptions) -> Result<Vec<JobHandle>> {
        let list = self.job_info_list(options).await?;
        Ok(list
            .jobs
            .into_iter()
            .map(|info| self.job(info.job_id))
            .collect())
    }

    /// Job snapshots matching `options`, with any count/total metadata.
    pub async fn job_info_list(&self, options: &JobListOptions) -> Result<JobList> {
        let mut url = self.core.url(&[JOBS_PATH]);
        let query = options.query_string();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let value = self.core.execute(JOBS_OPERATION, HttpRequest::get(url)).await?;
        JobList::from_value(value).map_err(|e| GridError::invalid_response(JOBS_OPERATION, e))
    }

    /// Run a structured job search.
    pub async fn search_jobs(&self, search: &JobSearch) -> Result<JobList> {
        let url = self.core.url(&[JOBS_PATH, JOB_SEARCH_PATH]);
        let body = serde_json::to_value(search)
            .map_err(|e| GridError::invalid_response(SEARCH_OPERATION, e))?;

        let value = self
            .core
            .execute(SEARCH_OPERATION, HttpRequest::post(url, body))
            .await?;
        JobList::from_value(value).map_err(|e| GridError::invalid_response(SEARCH_OPERATION, e))
    }

    /// Listen to one event kind across every job of the session.
    pub fn on<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.core.bus().on(kind, handler)
    }

    pub fn once<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.core.bus().once(kind, handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.bus().remove_listener(id)
    }

    /// Remove session listeners for `kind`, or all of them when `None`.
    ///
    /// Job handles keep their own subscriptions.
    pub fn remove_all_listeners(&self, kind: Option<JobEventKind>) {
        self.core.bus().remove_all_listeners(kind)
    }

    pub fn listener_count(&self, kind: JobEventKind) -> usize {
        self.core.bus().listener_count(kind)
    }

    /// Receiver for every event the session dispatches, derived `Completed`
    /// events included. Slow receivers observe `RecvError::Lagged`.
    pub fn watch(&self) -> broadcast::Receiver<JobEvent> {
        self.core.bus().watch()
    }

    /// Resolves once the event stream has ended or failed to open. The
    /// stream is not reopened; polling through `info()` keeps working.
    pub async fn stream_closed(&self) {
        self.core.bus().stream_closed().await
    }
}
