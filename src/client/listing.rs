//! Job listing and search.
//!
//! The plain listing (`GET /jobs?offset&limit&reverse&status`) is the
//! canonical contract. [`JobSearch`] posts the richer query document to
//! `/jobs/search`; both answer with the same [`JobList`] shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::{JobId, JobInfo, JobStatus};

/// Filters for the plain job listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListOptions {
    /// Number of jobs to skip.
    pub offset: Option<u64>,
    /// Maximum number of jobs returned. `-1` asks for every job.
    pub limit: Option<i64>,
    /// Reverse the order before offset and limit apply.
    #[serde(default)]
    pub reverse: bool,
    pub status: Option<JobStatus>,
}

impl JobListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Query string without the leading `?`; empty when no filter is set.
    pub fn query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            params.push(format!("offset={}", offset));
        }
        if let Some(limit) = self.limit.filter(|l| *l != 0) {
            params.push(format!("limit={}", limit));
        }
        if self.reverse {
            params.push("reverse=true".to_string());
        }
        if let Some(status) = &self.status {
            params.push(format!("status={}", urlencoding::encode(status.as_str())));
        }
        params.join("&")
    }
}

/// Sort key for [`JobSearch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSort {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// Richer search document posted to `/jobs/search`.
///
/// `query` is passed through untouched, e.g.
/// `{"jobStatus": {"$eq": "Failed"}, "jobSubmitted": {"$gt": "2024-01-01"}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSearch {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<JobSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Ask the server for per-status totals.
    #[serde(default)]
    pub totals: bool,
}

impl JobSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, condition: Value) -> Self {
        self.query.insert(field.into(), condition);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort.push(JobSort {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn page(mut self, offset: u64, limit: i64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn with_totals(mut self) -> Self {
        self.totals = true;
        self
    }
}

/// Per-status counts, when the server reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTotals {
    pub accepted: Option<u64>,
    pub started: Option<u64>,
    pub succeeded: Option<u64>,
    pub failed: Option<u64>,
}

/// One page of jobs in server order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobList {
    pub jobs: Vec<JobInfo>,
    pub count: Option<u64>,
    pub total: Option<u64>,
    pub totals: JobTotals,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJobList {
    #[serde(default)]
    jobs: Vec<Value>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(flatten)]
    totals: JobTotals,
}

impl JobList {
    /// Normalize a listing response; a bare array is accepted as the job list.
    pub(crate) fn from_value(value: Value) -> Result<Self, String> {
        let raw = match value {
            Value::Array(jobs) => RawJobList {
                jobs,
                count: None,
                total: None,
                totals: JobTotals::default(),
            },
            other => serde_json::from_value(other).map_err(|e| format!("invalid job list: {}", e))?,
        };

        let jobs = raw
            .jobs
            .into_iter()
            .map(|entry| {
                let id: JobId = entry
                    .get("jobId")
                    .cloned()
                    .ok_or_else(|| "job entry is missing jobId".to_string())
                    .and_then(|id| serde_json::from_value(id).map_err(|e| e.to_string()))?;
                JobInfo::from_value(entry, &id)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            jobs,
            count: raw.count,
            total: raw.total,
            totals: raw.totals,
        })
    }
}
