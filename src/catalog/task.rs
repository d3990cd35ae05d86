use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::client::ClientCore;
use crate::config::{SERVICES_PATH, SUBMIT_JOB_PATH};
use crate::error::Result;
use crate::job::{JobCallbacks, JobHandle, JobId, ResultBindings};
use crate::transport::HttpRequest;

const INFO_OPERATION: &str = "Error requesting task info";

// ============================================================================
// Task description
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterDirection {
    Input,
    Output,
}

/// One declared task parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParameter {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// "required" or "optional".
    #[serde(default)]
    pub parameter_type: Option<String>,
    #[serde(default)]
    pub direction: Option<ParameterDirection>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choice_list: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl TaskParameter {
    pub fn is_required(&self) -> bool {
        self.parameter_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("required"))
    }
}

/// Task description with parameters keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTaskInfo")]
pub struct TaskInfo {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub input_parameters: BTreeMap<String, TaskParameter>,
    pub output_parameters: BTreeMap<String, TaskParameter>,
}

/// Servers describe parameters either as separate input/output arrays or as
/// one `parameters` array tagged with a direction.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTaskInfo {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Vec<TaskParameter>,
    #[serde(default)]
    input_parameters: Vec<TaskParameter>,
    #[serde(default)]
    output_parameters: Vec<TaskParameter>,
}

impl From<RawTaskInfo> for TaskInfo {
    fn from(raw: RawTaskInfo) -> Self {
        let mut input_parameters = BTreeMap::new();
        let mut output_parameters = BTreeMap::new();

        for param in raw.parameters {
            match param.direction {
                Some(ParameterDirection::Output) => output_parameters.insert(param.name.clone(), param),
                _ => input_parameters.insert(param.name.clone(), param),
            };
        }
        for mut param in raw.input_parameters {
            param.direction = Some(ParameterDirection::Input);
            input_parameters.insert(param.name.clone(), param);
        }
        for mut param in raw.output_parameters {
            param.direction = Some(ParameterDirection::Output);
            output_parameters.insert(param.name.clone(), param);
        }

        Self {
            name: raw.name,
            display_name: raw.display_name,
            description: raw.description,
            input_parameters,
            output_parameters,
        }
    }
}

impl TaskInfo {
    /// Look up a parameter in either direction.
    pub fn parameter(&self, name: &str) -> Option<&TaskParameter> {
        self.input_parameters
            .get(name)
            .or_else(|| self.output_parameters.get(name))
    }
}

// ============================================================================
// Submission
// ============================================================================

/// Job options sent with a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Route on which to run the job. Selects the submit URL; not sent in the body.
    #[serde(skip)]
    pub route: Option<String>,
    /// Server-specific options, passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What to submit: input bindings plus job options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitOptions {
    pub input_parameters: Map<String, Value>,
    pub job_options: JobOptions,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_parameters.insert(name.into(), value.into());
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.job_options.route = Some(route.into());
        self
    }

    pub fn job_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.job_options.extra.insert(name.into(), value.into());
        self
    }

    fn body(&self) -> Value {
        json!({
            "inputParameters": self.input_parameters,
            "jobOptions": self.job_options,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: JobId,
}

// ============================================================================
// Handle
// ============================================================================

/// A task offered by a service.
#[derive(Clone)]
pub struct TaskHandle {
    service: String,
    name: String,
    core: Arc<ClientCore>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("service", &self.service)
            .field("name", &self.name)
            .finish()
    }
}

impl TaskHandle {
    pub(crate) fn new(core: Arc<ClientCore>, service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            core,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    fn task_url(&self) -> String {
        self.core.url(&[
            SERVICES_PATH,
            &urlencoding::encode(&self.service),
            &urlencoding::encode(&self.name),
        ])
    }

    fn submit_url(&self, route: Option<&str>) -> String {
        match route {
            Some(route) => format!(
                "{}/{}/{}",
                self.task_url(),
                urlencoding::encode(route),
                SUBMIT_JOB_PATH
            ),
            None => format!("{}/{}", self.task_url(), SUBMIT_JOB_PATH),
        }
    }

    pub async fn info(&self) -> Result<TaskInfo> {
        self.core
            .execute_as(INFO_OPERATION, HttpRequest::get(self.task_url()))
            .await
    }

    /// Submit the task as a job.
    ///
    /// One POST; on success returns a handle for the new job with `callbacks`
    /// already registered.
    pub async fn submit(&self, options: SubmitOptions, callbacks: JobCallbacks) -> Result<JobHandle> {
        let url = self.submit_url(options.job_options.route.as_deref());
        let operation = format!("Error submitting job to {}", url);

        let response: SubmitResponse = self
            .core
            .execute_as(&operation, HttpRequest::post(url, options.body()))
            .await?;

        info!(service = %self.service, task = %self.name, job_id = %response.job_id, "job submitted");
        Ok(JobHandle::new(self.core.clone(), response.job_id, callbacks))
    }

    /// `submit` followed by [`JobHandle::wait`].
    pub async fn submit_and_wait(
        &self,
        options: SubmitOptions,
        callbacks: JobCallbacks,
    ) -> Result<ResultBindings> {
        let job = self.submit(options, callbacks).await?;
        debug!(job_id = %job.id(), "waiting on submitted job");
        job.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::GridError;
    use crate::testing::ScriptedTransport;
    use crate::transport::{HttpResponse, Method};
    use pretty_assertions::assert_eq;

    fn task(transport: &ScriptedTransport) -> TaskHandle {
        let core = Arc::new(ClientCore::new(
            ClientConfig::new("grid.test"),
            Arc::new(transport.clone()),
        ));
        TaskHandle::new(core, "javascript", "Sleep")
    }

    #[test]
    fn legacy_parameters_split_by_direction() {
        let info: TaskInfo = serde_json::from_value(json!({
            "name": "Sleep",
            "parameters": [
                { "name": "INPUT_INTEGER", "direction": "INPUT", "parameterType": "required", "dataType": "INTEGER" },
                { "name": "OUTPUT", "direction": "OUTPUT", "dataType": "INTEGER" }
            ]
        }))
        .unwrap();

        assert!(info.input_parameters["INPUT_INTEGER"].is_required());
        assert_eq!(
            info.output_parameters["OUTPUT"].direction,
            Some(ParameterDirection::Output)
        );
        assert!(info.parameter("OUTPUT").is_some());
        assert!(info.parameter("MISSING").is_none());
    }

    #[test]
    fn split_parameter_arrays_are_keyed_by_name() {
        let info: TaskInfo = serde_json::from_value(json!({
            "name": "Sleep",
            "inputParameters": [ { "name": "SLEEP_TIME" } ],
            "outputParameters": [ { "name": "OUTPUT" } ]
        }))
        .unwrap();

        assert_eq!(
            info.input_parameters["SLEEP_TIME"].direction,
            Some(ParameterDirection::Input)
        );
        assert_eq!(info.output_parameters.len(), 1);
    }

    #[tokio::test]
    async fn submit_posts_body_and_routes() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::Post,
            "http://grid.test/services/javascript/Sleep/fast/submitJob",
            HttpResponse::json(200, &json!({ "jobId": "12" })),
        );
        let task = task(&transport);

        let job = task
            .submit(
                SubmitOptions::new()
                    .input("INPUT_INTEGER", 42)
                    .route("fast")
                    .job_option("priority", 2),
                JobCallbacks::new(),
            )
            .await
            .unwrap();

        assert_eq!(job.id(), &JobId::from("12"));
        let sent = transport.requests();
        assert_eq!(
            sent[0].body,
            Some(json!({
                "inputParameters": { "INPUT_INTEGER": 42 },
                "jobOptions": { "priority": 2 }
            }))
        );
    }

    #[tokio::test]
    async fn submit_failures_name_the_url() {
        let transport = ScriptedTransport::new();
        let url = "http://grid.test/services/javascript/Sleep/submitJob";
        transport.respond(Method::Post, url, HttpResponse::new(400, "bad input"));
        let task = task(&transport);

        let err = task.submit(SubmitOptions::new(), JobCallbacks::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Error submitting job to {}: 400: bad input", url)
        );

        transport.respond(Method::Post, url, HttpResponse::json(200, &json!({ "status": "ok" })));
        let err = task.submit(SubmitOptions::new(), JobCallbacks::new()).await.unwrap_err();
        assert!(matches!(err, GridError::InvalidResponse { .. }));
    }
}
