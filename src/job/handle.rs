//! Per-job handle: pull (`info`), push (listeners) and their reconciliation (`wait`).

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::debug;

use super::id::JobId;
use super::info::{JobInfo, JobStatus, ResultBindings};
use super::router::JobEventRouter;
use crate::bus::{Handler, JobEvent, JobEventKind, ListenerId, ListenerTable};
use crate::client::ClientCore;
use crate::config::{JOBS_PATH, JOB_STATUS_PATH};
use crate::error::{GridError, Result};
use crate::transport::HttpRequest;

const INFO_OPERATION: &str = "Error requesting job info";
const CANCEL_OPERATION: &str = "Error cancelling job";

type WaitFuture = Shared<BoxFuture<'static, Result<ResultBindings>>>;

/// Callbacks wired into a job handle at construction.
///
/// Both are repeatable listeners and never influence [`JobHandle::wait`].
/// `on_started` is best effort: a job that starts before its handle exists
/// will not trigger it.
#[derive(Clone, Default)]
pub struct JobCallbacks {
    on_progress: Option<Handler>,
    on_started: Option<Handler>,
}

impl JobCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(handler));
        self
    }

    pub fn on_started<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.on_started = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for JobCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_started", &self.on_started.is_some())
            .finish()
    }
}

/// Handle to one job on the server.
///
/// Cheap to clone; clones share listeners and the memoized wait future. The
/// handle's bus subscriptions are released when the last clone is dropped.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

struct JobInner {
    id: JobId,
    core: Arc<ClientCore>,
    listeners: Arc<ListenerTable>,
    router: Arc<JobEventRouter>,
    waiting: OnceLock<WaitFuture>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.inner.id)
            .field("listeners", &self.inner.listeners.total())
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

impl JobHandle {
    pub(crate) fn new(core: Arc<ClientCore>, id: JobId, callbacks: JobCallbacks) -> Self {
        let listeners = Arc::new(ListenerTable::new());
        if let Some(handler) = callbacks.on_progress {
            listeners.on(JobEventKind::Progress, move |event| handler(event));
        }
        if let Some(handler) = callbacks.on_started {
            listeners.on(JobEventKind::Started, move |event| handler(event));
        }

        let router = Arc::new(JobEventRouter::attach(core.bus().clone(), id.clone(), &listeners));

        Self {
            inner: Arc::new(JobInner {
                id,
                core,
                listeners,
                router,
                waiting: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.inner.id
    }

    /// Fetch a fresh snapshot of the job. Never cached.
    pub async fn info(&self) -> Result<JobInfo> {
        fetch_info(&self.inner.core, &self.inner.id).await
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// The first call registers one pair of terminal listeners right away and
    /// builds the wait future; every later call returns a clone of that same
    /// future. The entry status poll starts when the future is first polled,
    /// not when `wait` is called, but terminal events arriving in between are
    /// already captured. The poll and the terminal event race, and the first
    /// to observe the terminal state settles the future. Resolves with the
    /// result bindings on success and fails with [`GridError::JobFailed`] on
    /// failure. No timeout is applied.
    pub fn wait(&self) -> impl Future<Output = Result<ResultBindings>> + Send + 'static {
        self.inner.waiting.get_or_init(|| self.begin_wait()).clone()
    }

    /// Whether [`wait`](Self::wait) has been called on this job.
    pub fn is_waiting(&self) -> bool {
        self.inner.waiting.get().is_some()
    }

    /// Request cancellation. `force` asks the server to kill the job, which may
    /// skip the task's own cleanup.
    ///
    /// Returns once the server has accepted the request; observe termination
    /// through [`wait`](Self::wait) or the job events.
    pub async fn cancel(&self, force: bool) -> Result<bool> {
        let core = &self.inner.core;
        let mut url = core.url(&[JOBS_PATH, &self.inner.id.path_segment()]);
        if force {
            url.push_str("?kill=true");
        }

        debug!(job_id = %self.inner.id, force, "requesting job cancellation");
        core.execute(CANCEL_OPERATION, HttpRequest::delete(url)).await?;
        Ok(true)
    }

    pub fn on<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.on(kind, handler)
    }

    pub fn once<F>(&self, kind: JobEventKind, handler: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.once(kind, handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Remove listeners for `kind`, or all of them when `None`.
    ///
    /// Listeners registered by a pending [`wait`](Self::wait) are removed too,
    /// leaving that future to settle through its status poll alone.
    pub fn remove_all_listeners(&self, kind: Option<JobEventKind>) {
        self.inner.listeners.remove_all(kind)
    }

    pub fn listener_count(&self, kind: JobEventKind) -> usize {
        self.inner.listeners.count(kind)
    }

    fn begin_wait(&self) -> WaitFuture {
        let inner = &self.inner;
        let (tx, rx) = oneshot::channel::<JobEventKind>();
        let slot = Arc::new(Mutex::new(Some(tx)));

        for kind in [JobEventKind::Succeeded, JobEventKind::Failed] {
            let slot = slot.clone();
            inner.listeners.once(kind, move |_| {
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(kind);
                }
            });
        }

        debug!(job_id = %inner.id, "waiting for job");

        let core = inner.core.clone();
        let id = inner.id.clone();
        // Keep events flowing to the listeners above while any waiter is alive,
        // even after every handle has been dropped.
        let keep_alive = (inner.listeners.clone(), inner.router.clone());

        async move {
            let _keep_alive = keep_alive;

            let poll_arm = async {
                match fetch_info(&core, &id).await {
                    Ok(info) => match settle_from_status(info) {
                        Some(outcome) => outcome,
                        None => {
                            debug!(job_id = %id, "job not terminal at entry poll");
                            std::future::pending().await
                        }
                    },
                    Err(e) => Err(e),
                }
            };

            let event_arm = async {
                match rx.await {
                    Ok(kind) => {
                        debug!(job_id = %id, event = %kind, "terminal event received, confirming");
                        fetch_info(&core, &id)
                            .await
                            .and_then(|info| settle_from_event(kind, info))
                    }
                    // Listener removed before it fired; the poll arm decides.
                    Err(_) => std::future::pending().await,
                }
            };

            tokio::select! {
                outcome = poll_arm => outcome,
                outcome = event_arm => outcome,
            }
        }
        .boxed()
        .shared()
    }
}

async fn fetch_info(core: &ClientCore, id: &JobId) -> Result<JobInfo> {
    let url = core.url(&[JOBS_PATH, &id.path_segment(), JOB_STATUS_PATH]);
    let value = core.execute(INFO_OPERATION, HttpRequest::get(url)).await?;
    JobInfo::from_value(value, id).map_err(|e| GridError::invalid_response(INFO_OPERATION, e))
}

fn settle_from_status(info: JobInfo) -> Option<Result<ResultBindings>> {
    match info.status {
        JobStatus::Succeeded => Some(Ok(info.results)),
        JobStatus::Failed => Some(Err(job_failure(info))),
        _ => None,
    }
}

fn settle_from_event(kind: JobEventKind, info: JobInfo) -> Result<ResultBindings> {
    match kind {
        JobEventKind::Succeeded => Ok(info.results),
        _ => Err(job_failure(info)),
    }
}

fn job_failure(info: JobInfo) -> GridError {
    GridError::JobFailed {
        message: info.error_message().unwrap_or_else(|| "Job failed".to_string()),
        job_id: info.job_id,
        error: info.error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientCore;
    use crate::config::ClientConfig;
    use crate::testing::ScriptedTransport;
    use crate::transport::{HttpResponse, Method};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STATUS_URL: &str = "http://grid.test/jobs/7/status";

    fn core_with(transport: &ScriptedTransport) -> Arc<ClientCore> {
        Arc::new(ClientCore::new(
            ClientConfig::new("grid.test"),
            Arc::new(transport.clone()),
        ))
    }

    fn status(status: &str) -> HttpResponse {
        HttpResponse::json(
            200,
            &json!({
                "jobId": 7,
                "jobStatus": status,
                "jobResults": { "OUTPUT": { "best": 42, "raw": 42 } },
                "jobError": if status == "Failed" { "Task Failed" } else { "" }
            }),
        )
    }

    #[tokio::test]
    async fn concurrent_waits_share_one_entry_poll() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::Get, STATUS_URL, status("Succeeded"));
        let job = JobHandle::new(core_with(&transport), JobId::from(7), JobCallbacks::new());

        let waits: Vec<_> = (0..8).map(|_| job.clone().wait()).collect();
        let outcomes = futures::future::join_all(waits).await;

        for outcome in outcomes {
            assert_eq!(outcome.unwrap().get("OUTPUT"), Some(&json!(42)));
        }
        assert_eq!(transport.count(Method::Get, STATUS_URL), 1);
        assert_eq!(job.listener_count(JobEventKind::Succeeded), 1);
        assert_eq!(job.listener_count(JobEventKind::Failed), 1);
        assert!(job.is_waiting());
    }

    #[tokio::test]
    async fn event_triggers_confirmation_poll() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::Get, STATUS_URL, status("Started"));
        let core = core_with(&transport);
        let job = JobHandle::new(core.clone(), JobId::from(7), JobCallbacks::new());

        let wait = tokio::spawn(job.wait());
        while transport.count(Method::Get, STATUS_URL) == 0 {
            tokio::task::yield_now().await;
        }

        transport.respond(Method::Get, STATUS_URL, status("Failed"));
        core.bus().dispatch_raw("JobFailed", r#"{"jobId":7}"#);

        let err = wait.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Task Failed");
        assert!(err.is_job_failure());
        assert_eq!(transport.count(Method::Get, STATUS_URL), 2);
    }

    #[tokio::test]
    async fn entry_poll_waits_for_first_await() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::Get, STATUS_URL, status("Started"));
        let core = core_with(&transport);
        let job = JobHandle::new(core.clone(), JobId::from(7), JobCallbacks::new());

        let wait = job.wait();
        assert_eq!(transport.count(Method::Get, STATUS_URL), 0);
        assert_eq!(job.listener_count(JobEventKind::Succeeded), 1);

        // The terminal event lands before the first await and is not lost.
        transport.respond(Method::Get, STATUS_URL, status("Succeeded"));
        core.bus().dispatch_raw("JobSucceeded", r#"{"jobId":7}"#);

        let results = wait.await.unwrap();
        assert_eq!(results.get("OUTPUT"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn failure_keeps_structured_server_error() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::Get,
            STATUS_URL,
            HttpResponse::json(
                200,
                &json!({
                    "jobId": 7,
                    "jobStatus": "Failed",
                    "jobError": { "message": "Out of memory", "code": 137 }
                }),
            ),
        );
        let job = JobHandle::new(core_with(&transport), JobId::from(7), JobCallbacks::new());

        let err = job.wait().await.unwrap_err();

        assert_eq!(err.to_string(), "Out of memory");
        assert_eq!(err.job_error(), Some(&json!({ "message": "Out of memory", "code": 137 })));
    }

    #[tokio::test]
    async fn callbacks_are_repeatable_listeners() {
        let transport = ScriptedTransport::new();
        let core = core_with(&transport);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let job = JobHandle::new(
            core.clone(),
            JobId::from(7),
            JobCallbacks::new().on_progress(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        core.bus().dispatch_raw("JobProgress", r#"{"jobId":7,"progress":20}"#);
        core.bus().dispatch_raw("JobProgress", r#"{"jobId":7,"progress":40}"#);
        core.bus().dispatch_raw("JobProgress", r#"{"jobId":8,"progress":40}"#);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(job.listener_count(JobEventKind::Progress), 1);
    }

    #[tokio::test]
    async fn cancel_sends_delete_with_kill_flag() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::Delete, "http://grid.test/jobs/7?kill=true", HttpResponse::new(200, ""));
        transport.respond(Method::Delete, "http://grid.test/jobs/7", HttpResponse::new(500, "busy"));
        let job = JobHandle::new(core_with(&transport), JobId::from(7), JobCallbacks::new());

        assert_eq!(job.cancel(true).await, Ok(true));
        let err = job.cancel(false).await.unwrap_err();
        assert_eq!(err.to_string(), "Error cancelling job: 500: busy");
    }

    #[tokio::test]
    async fn dropping_handle_releases_bus_subscriptions() {
        let transport = ScriptedTransport::new();
        let core = core_with(&transport);
        let job = JobHandle::new(core.clone(), JobId::from(7), JobCallbacks::new());
        let clone = job.clone();

        assert_eq!(core.bus().route_count(JobEventKind::Started), 1);
        drop(job);
        assert_eq!(core.bus().route_count(JobEventKind::Started), 1);
        drop(clone);
        assert_eq!(core.bus().route_count(JobEventKind::Started), 0);
    }
}
