//! Job lifecycle event kinds, their names, and wire decoding.
//!
//! Single source of truth for the two naming conventions: session-scope
//! events use the prefixed form (`JobStarted`), job-scope events the bare
//! form (`Started`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::job::JobId;

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

pub const EVENT_JOB_ACCEPTED: &str = "JobAccepted";
pub const EVENT_JOB_STARTED: &str = "JobStarted";
pub const EVENT_JOB_PROGRESS: &str = "JobProgress";
pub const EVENT_JOB_SUCCEEDED: &str = "JobSucceeded";
pub const EVENT_JOB_FAILED: &str = "JobFailed";
pub const EVENT_JOB_COMPLETED: &str = "JobCompleted";

/// The six lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobEventKind {
    Accepted,
    Started,
    Progress,
    Succeeded,
    Failed,
    /// Derived from Succeeded/Failed on the client. Never read from the wire.
    Completed,
}

impl JobEventKind {
    pub const ALL: [JobEventKind; 6] = [
        JobEventKind::Accepted,
        JobEventKind::Started,
        JobEventKind::Progress,
        JobEventKind::Succeeded,
        JobEventKind::Failed,
        JobEventKind::Completed,
    ];

    /// Kinds the server pushes over the event stream.
    pub const WIRE: [JobEventKind; 5] = [
        JobEventKind::Accepted,
        JobEventKind::Started,
        JobEventKind::Progress,
        JobEventKind::Succeeded,
        JobEventKind::Failed,
    ];

    /// Session-scope name, also the SSE channel name.
    pub fn session_name(self) -> &'static str {
        match self {
            JobEventKind::Accepted => EVENT_JOB_ACCEPTED,
            JobEventKind::Started => EVENT_JOB_STARTED,
            JobEventKind::Progress => EVENT_JOB_PROGRESS,
            JobEventKind::Succeeded => EVENT_JOB_SUCCEEDED,
            JobEventKind::Failed => EVENT_JOB_FAILED,
            JobEventKind::Completed => EVENT_JOB_COMPLETED,
        }
    }

    /// Job-scope name.
    pub fn job_name(self) -> &'static str {
        match self {
            JobEventKind::Accepted => "Accepted",
            JobEventKind::Started => "Started",
            JobEventKind::Progress => "Progress",
            JobEventKind::Succeeded => "Succeeded",
            JobEventKind::Failed => "Failed",
            JobEventKind::Completed => "Completed",
        }
    }

    /// Kind carried by a server channel. `JobCompleted` is not a wire channel.
    pub fn from_wire_channel(channel: &str) -> Option<Self> {
        Self::WIRE.into_iter().find(|k| k.session_name() == channel)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobEventKind::Succeeded | JobEventKind::Failed)
    }
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.job_name())
    }
}

impl FromStr for JobEventKind {
    type Err = String;

    /// Accepts either naming convention.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.job_name() == s || k.session_name() == s)
            .ok_or_else(|| format!("unknown job event '{}'", s))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A job lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum JobEvent {
    Accepted {
        job_id: JobId,
    },
    Started {
        job_id: JobId,
    },
    Progress {
        job_id: JobId,
        /// Advisory percentage; 100 does not imply completion.
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Succeeded {
        job_id: JobId,
    },
    Failed {
        job_id: JobId,
    },
    Completed {
        job_id: JobId,
        success: bool,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    job_id: JobId,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

impl JobEvent {
    pub fn kind(&self) -> JobEventKind {
        match self {
            JobEvent::Accepted { .. } => JobEventKind::Accepted,
            JobEvent::Started { .. } => JobEventKind::Started,
            JobEvent::Progress { .. } => JobEventKind::Progress,
            JobEvent::Succeeded { .. } => JobEventKind::Succeeded,
            JobEvent::Failed { .. } => JobEventKind::Failed,
            JobEvent::Completed { .. } => JobEventKind::Completed,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Accepted { job_id }
            | JobEvent::Started { job_id }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Succeeded { job_id }
            | JobEvent::Failed { job_id }
            | JobEvent::Completed { job_id, .. } => job_id,
        }
    }

    /// Decode the JSON payload of a server channel message.
    pub fn from_wire(kind: JobEventKind, data: &str) -> Result<Self, serde_json::Error> {
        let payload: WirePayload = serde_json::from_str(data)?;
        let job_id = payload.job_id;
        Ok(match kind {
            JobEventKind::Accepted => JobEvent::Accepted { job_id },
            JobEventKind::Started => JobEvent::Started { job_id },
            JobEventKind::Progress => JobEvent::Progress {
                job_id,
                progress: payload.progress.unwrap_or_default(),
                message: payload.message,
            },
            JobEventKind::Succeeded => JobEvent::Succeeded { job_id },
            JobEventKind::Failed => JobEvent::Failed { job_id },
            JobEventKind::Completed => JobEvent::Completed {
                job_id,
                success: false,
            },
        })
    }

    /// The `Completed` event implied by a terminal event.
    pub fn derived_completion(&self) -> Option<JobEvent> {
        match self {
            JobEvent::Succeeded { job_id } => Some(JobEvent::Completed {
                job_id: job_id.clone(),
                success: true,
            }),
            JobEvent::Failed { job_id } => Some(JobEvent::Completed {
                job_id: job_id.clone(),
                success: false,
            }),
            _ => None,
        }
    }
}
