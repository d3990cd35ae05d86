//! Error types surfaced by the SDK.
//!
//! Every public operation returns [`GridError`]. Request failures keep the
//! operation description, HTTP status and response body separate so callers
//! can branch on them, while `Display` renders the familiar
//! `"<operation>: <status>: <body>"` message.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::job::JobId;

/// Errors returned by the Grid client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    /// A transport call failed or returned a non-2xx status.
    #[error("{}", format_request_error(operation, *status, body.as_deref()))]
    Request {
        operation: String,
        status: Option<u16>,
        body: Option<String>,
    },

    /// The job reached the Failed state. Only produced by `JobHandle::wait`.
    ///
    /// `error` is the server's error value as reported, which may be a
    /// structured object carrying more than `message`.
    #[error("{message}")]
    JobFailed {
        job_id: JobId,
        message: String,
        error: Option<Value>,
    },

    /// The server answered 2xx but the payload did not have the expected shape.
    #[error("{operation}: {message}")]
    InvalidResponse { operation: String, message: String },

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GridError {
    /// Create a request error for a failure that never produced a response.
    pub fn unreachable(operation: impl Into<String>) -> Self {
        GridError::Request {
            operation: operation.into(),
            status: None,
            body: None,
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response<E: fmt::Display>(operation: impl Into<String>, err: E) -> Self {
        GridError::InvalidResponse {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// HTTP status attached to a request error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GridError::Request { status, .. } => *status,
            _ => None,
        }
    }

    /// Server error value attached to a job failure, if any.
    pub fn job_error(&self) -> Option<&Value> {
        match self {
            GridError::JobFailed { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    /// Check if this error is a job failure reported by the server.
    pub fn is_job_failure(&self) -> bool {
        matches!(self, GridError::JobFailed { .. })
    }
}

fn format_request_error(operation: &str, status: Option<u16>, body: Option<&str>) -> String {
    let mut message = operation.to_string();
    if let Some(status) = status {
        message.push_str(&format!(": {}", status));
    }
    if let Some(body) = body.filter(|b| !b.is_empty()) {
        message.push_str(&format!(": {}", body));
    }
    message
}

pub type Result<T> = std::result::Result<T, GridError>;
