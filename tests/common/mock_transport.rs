//! In-memory Grid server implementing the client's `Transport`.
//!
//! Submitted jobs run a scripted lifecycle on a background task. Every state
//! change is applied to the job table before its event is pushed, as the real
//! server does, so a confirmation poll after an event sees the new state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;

use grid_sdk::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};

use super::mock_events::MockEventSource;

pub const ROOT_URL: &str = "http://grid.test";

/// Lifecycle of a submitted job, read from its input parameters the same way
/// the server's test tasks read them.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    pub sleep: Duration,
    pub fail: Option<String>,
    pub progress_steps: u32,
    pub progress_message: Option<String>,
    pub output: Value,
}

impl TaskPlan {
    fn from_inputs(inputs: &Map<String, Value>) -> Self {
        let fail = match inputs.get("FAIL") {
            Some(Value::Bool(true)) => Some(
                inputs
                    .get("ERROR_MESSAGE")
                    .and_then(Value::as_str)
                    .unwrap_or("Task Failed")
                    .to_string(),
            ),
            _ => None,
        };

        Self {
            sleep: Duration::from_millis(
                inputs.get("SLEEP_TIME").and_then(Value::as_u64).unwrap_or(0),
            ),
            fail,
            progress_steps: inputs
                .get("N_PROGRESS")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            progress_message: inputs
                .get("PROGRESS_MESSAGE")
                .and_then(Value::as_str)
                .map(str::to_string),
            output: inputs.get("INPUT_INTEGER").cloned().unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone)]
struct MockJob {
    id: String,
    service: String,
    task: String,
    inputs: Map<String, Value>,
    status: &'static str,
    results: Value,
    error: String,
    progress: f64,
    cancel: Arc<Notify>,
}

impl MockJob {
    fn to_json(&self) -> Value {
        json!({
            "jobId": self.id,
            "jobStatus": self.status,
            "serviceName": self.service,
            "taskName": self.task,
            "inputParameters": self.inputs,
            "jobResults": self.results,
            "jobProgress": self.progress,
            "jobError": self.error,
            "jobSubmitted": "2024-05-01T10:00:00Z",
            "jobStart": "",
            "jobEnd": ""
        })
    }
}

#[derive(Default)]
struct ServerState {
    jobs: Vec<MockJob>,
    status_polls: HashMap<String, usize>,
    requests: Vec<HttpRequest>,
}

/// A fake Grid server with one service, `javascript`, offering
/// `Sleep`, `Fail` and `Progress`.
#[derive(Clone)]
pub struct MockGridServer {
    state: Arc<Mutex<ServerState>>,
    events: MockEventSource,
}

impl MockGridServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState::default())),
            events: MockEventSource::new(),
        }
    }

    pub fn events(&self) -> MockEventSource {
        self.events.clone()
    }

    /// Number of status polls received for a job.
    pub fn status_polls(&self, id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .status_polls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn job_status(&self, id: &str) -> Option<&'static str> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|j| j.id == id)
            .map(|j| j.status)
    }

    /// Register a job that no background task drives; tests move it along
    /// with [`finish_job`](Self::finish_job).
    pub fn insert_job(&self, task: &str, status: &'static str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.jobs.len().to_string();
        state.jobs.push(MockJob {
            id: id.clone(),
            service: "javascript".to_string(),
            task: task.to_string(),
            inputs: Map::new(),
            status,
            results: json!({}),
            error: String::new(),
            progress: 0.0,
            cancel: Arc::new(Notify::new()),
        });
        id
    }

    /// Move a job to its terminal state, then push the matching event.
    pub fn finish_job(&self, id: &str, outcome: Result<Value, String>) {
        let success = outcome.is_ok();
        self.update(id, |job| match outcome {
            Ok(output) => {
                job.status = "Succeeded";
                job.progress = 100.0;
                job.results = json!({ "OUTPUT": { "best": output, "raw": output } });
            }
            Err(message) => {
                job.status = "Failed";
                job.error = message;
            }
        });
        let event = if success { "JobSucceeded" } else { "JobFailed" };
        self.events.push(event, json!({ "jobId": id }));
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut MockJob)) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            f(job);
        }
    }

    fn submit(&self, task: &str, body: &Value) -> HttpResponse {
        let inputs = body
            .get("inputParameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let plan = TaskPlan::from_inputs(&inputs);

        let (id, cancel) = {
            let mut state = self.state.lock().unwrap();
            let id = state.jobs.len().to_string();
            let cancel = Arc::new(Notify::new());
            state.jobs.push(MockJob {
                id: id.clone(),
                service: "javascript".to_string(),
                task: task.to_string(),
                inputs,
                status: "Accepted",
                results: json!({}),
                error: String::new(),
                progress: 0.0,
                cancel: cancel.clone(),
            });
            (id, cancel)
        };

        tokio::spawn(self.clone().run_job(id.clone(), plan, cancel));
        HttpResponse::json(200, &json!({ "jobId": id }))
    }

    async fn run_job(self, id: String, plan: TaskPlan, cancel: Arc<Notify>) {
        // Let the submit response reach the client first.
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.events.push("JobAccepted", json!({ "jobId": id }));

        self.update(&id, |job| job.status = "Started");
        self.events.push("JobStarted", json!({ "jobId": id }));

        let steps = plan.progress_steps.max(1);
        for i in 0..plan.progress_steps {
            let progress = f64::from(i * (100 / steps));
            self.update(&id, |job| job.progress = progress);
            let mut payload = json!({ "jobId": id, "progress": progress });
            if let Some(message) = &plan.progress_message {
                payload["message"] = json!(message);
            }
            self.events.push("JobProgress", payload);
        }

        let cancelled = tokio::select! {
            _ = tokio::time::sleep(plan.sleep) => false,
            _ = cancel.notified() => true,
        };

        let outcome = if cancelled {
            Err("Job cancelled".to_string())
        } else {
            match plan.fail {
                Some(message) => Err(message),
                None => Ok(plan.output),
            }
        };
        self.finish_job(&id, outcome);
    }

    fn route(&self, request: &HttpRequest) -> HttpResponse {
        let Some(rest) = request.url.strip_prefix(ROOT_URL) else {
            return HttpResponse::new(404, "unknown host");
        };
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, ["services"]) => {
                HttpResponse::json(200, &json!({ "services": [ { "name": "javascript" } ] }))
            }
            (Method::Get, ["services", "javascript"]) => HttpResponse::json(
                200,
                &json!({ "name": "javascript", "tasks": ["Sleep", "Fail", "Progress"] }),
            ),
            (Method::Post, ["services", "javascript", task, "submitJob"]) => {
                self.submit(task, request.body.as_ref().unwrap_or(&Value::Null))
            }
            (Method::Get, ["jobs", id, "status"]) => {
                let mut state = self.state.lock().unwrap();
                *state.status_polls.entry(id.to_string()).or_default() += 1;
                match state.jobs.iter().find(|j| j.id == *id) {
                    Some(job) => HttpResponse::json(200, &job.to_json()),
                    None => HttpResponse::new(404, "Job not found"),
                }
            }
            (Method::Delete, ["jobs", id]) => {
                let state = self.state.lock().unwrap();
                match state.jobs.iter().find(|j| j.id == *id) {
                    Some(job) => {
                        job.cancel.notify_one();
                        HttpResponse::json(200, &json!({ "jobId": id, "kill": query == "kill=true" }))
                    }
                    None => HttpResponse::new(404, "Job not found"),
                }
            }
            (Method::Get, ["jobs"]) => {
                let state = self.state.lock().unwrap();
                let reverse = query.split('&').any(|p| p == "reverse=true");
                let mut jobs: Vec<Value> = state.jobs.iter().map(MockJob::to_json).collect();
                if reverse {
                    jobs.reverse();
                }
                let total = jobs.len();
                HttpResponse::json(200, &json!({ "jobs": jobs, "count": total, "total": total }))
            }
            _ => HttpResponse::new(404, "Not found"),
        }
    }
}

#[async_trait]
impl Transport for MockGridServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.route(&request);
        self.state.lock().unwrap().requests.push(request);
        Ok(response)
    }
}
