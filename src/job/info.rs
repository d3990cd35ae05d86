//! Pull-based job snapshots and the normalization of server payloads.
//!
//! Everything that decodes a job status response goes through
//! [`JobInfo::from_value`], so the rest of the crate only ever sees one
//! canonical shape regardless of which field vocabulary the server used.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::JobId;

/// Output parameter name → produced value.
pub type ResultBindings = BTreeMap<String, Value>;

/// Public job status vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum JobStatus {
    Accepted,
    Started,
    Succeeded,
    Failed,
    /// Cancellation requested; the job still ends as Succeeded or Failed.
    CancelRequested,
    /// Forced cancellation requested; the job still ends as Succeeded or Failed.
    KillRequested,
    /// A status string this client does not recognize. Treated as non-terminal.
    Unknown(String),
}

impl JobStatus {
    /// Map a server status string onto the public vocabulary.
    pub fn from_wire(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        let normalized = normalized.strip_prefix("job").unwrap_or(&normalized);
        match normalized {
            "accepted" | "queued" | "pending" | "waiting" | "submitted" => JobStatus::Accepted,
            "started" | "running" | "executing" | "processing" => JobStatus::Started,
            "succeeded" | "success" | "complete" | "completed" | "done" => JobStatus::Succeeded,
            "failed" | "failure" | "error" | "cancelled" | "canceled" | "killed" | "aborted" => {
                JobStatus::Failed
            }
            "cancelrequested" | "cancel_requested" | "cancelling" | "canceling" => {
                JobStatus::CancelRequested
            }
            "killrequested" | "kill_requested" | "killing" => JobStatus::KillRequested,
            _ => JobStatus::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Accepted => "Accepted",
            JobStatus::Started => "Started",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
            JobStatus::CancelRequested => "CancelRequested",
            JobStatus::KillRequested => "KillRequested",
            JobStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        JobStatus::from_wire(&value)
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Snapshot of one job as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub job_id: JobId,
    pub status: JobStatus,
    pub service_name: Option<String>,
    pub task_name: Option<String>,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
    #[serde(default)]
    pub job_options: Map<String, Value>,
    /// Best representation of every output parameter.
    #[serde(default)]
    pub results: ResultBindings,
    /// Raw representation, for servers that report one alongside the best value.
    #[serde(default)]
    pub raw_results: ResultBindings,
    pub progress: Option<f64>,
    pub progress_message: Option<String>,
    /// Server-reported error, a string or a structured object.
    pub error: Option<Value>,
    pub submitted: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub node_info: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJobInfo {
    #[serde(default)]
    job_id: Option<JobId>,
    #[serde(alias = "status")]
    job_status: String,
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    task_name: Option<String>,
    #[serde(default, alias = "inputs")]
    input_parameters: Option<Value>,
    #[serde(default)]
    job_options: Option<Value>,
    #[serde(default, alias = "results")]
    job_results: Option<Value>,
    #[serde(default)]
    job_progress: Option<f64>,
    #[serde(default, alias = "jobProgressMessage")]
    job_message: Option<String>,
    #[serde(default, alias = "jobErrorMessage")]
    job_error: Option<Value>,
    #[serde(default)]
    job_submitted: Option<String>,
    #[serde(default)]
    job_start: Option<String>,
    #[serde(default)]
    job_end: Option<String>,
    #[serde(default)]
    node_info: Option<Value>,
}

impl JobInfo {
    /// Normalize a raw status payload. `fallback_id` is used when the payload
    /// omits the job id.
    pub fn from_value(value: Value, fallback_id: &JobId) -> Result<Self, String> {
        let raw: RawJobInfo =
            serde_json::from_value(value).map_err(|e| format!("invalid job info: {}", e))?;

        let (results, raw_results) = normalize_results(raw.job_results.unwrap_or(Value::Null))?;
        let (input_parameters, _) =
            normalize_results(raw.input_parameters.unwrap_or(Value::Null))?;

        Ok(Self {
            job_id: raw.job_id.unwrap_or_else(|| fallback_id.clone()),
            status: JobStatus::from_wire(&raw.job_status),
            service_name: non_empty(raw.service_name),
            task_name: non_empty(raw.task_name),
            input_parameters: input_parameters.into_iter().collect(),
            job_options: match raw.job_options {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            },
            results,
            raw_results,
            progress: raw.job_progress,
            progress_message: non_empty(raw.job_message),
            error: raw.job_error.filter(|e| match e {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            }),
            submitted: non_empty(raw.job_submitted),
            start: non_empty(raw.job_start),
            end: non_empty(raw.job_end),
            node_info: raw.node_info.filter(|v| !v.is_null()),
        })
    }

    /// Human-readable error text, if the job reported one.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|error| match error {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("message") {
                Some(Value::String(s)) => s.clone(),
                _ => error.to_string(),
            },
            other => other.to_string(),
        })
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.submitted.as_deref())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.start.as_deref())
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.end.as_deref())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert the server's result encodings into (best, raw) maps.
///
/// Accepted shapes: `[{name, value}]`, `{name: {best, raw}}`, `{name: value}`.
fn normalize_results(value: Value) -> Result<(ResultBindings, ResultBindings), String> {
    let mut best = ResultBindings::new();
    let mut raw = ResultBindings::new();

    let mut insert = |name: String, value: Value| match value {
        Value::Object(mut entry) if entry.contains_key("best") => {
            if let Some(r) = entry.remove("raw") {
                raw.insert(name.clone(), r);
            }
            best.insert(name, entry.remove("best").unwrap_or(Value::Null));
        }
        other => {
            best.insert(name, other);
        }
    };

    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                let Value::Object(mut item) = item else {
                    return Err("result entries must be objects".to_string());
                };
                let Some(Value::String(name)) = item.remove("name") else {
                    return Err("result entry is missing a name".to_string());
                };
                insert(name, item.remove("value").unwrap_or(Value::Null));
            }
        }
        Value::Object(map) => {
            for (name, value) in map {
                insert(name, value);
            }
        }
        other => return Err(format!("unexpected results value: {}", other)),
    }

    Ok((best, raw))
}
