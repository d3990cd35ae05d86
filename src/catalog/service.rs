use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::task::{TaskHandle, TaskInfo};
use crate::client::ClientCore;
use crate::config::SERVICES_PATH;
use crate::error::{GridError, Result};
use crate::transport::HttpRequest;

const INFO_OPERATION: &str = "Error requesting service info";
const TASKS_OPERATION: &str = "Error requesting tasks";
const TASK_INFO_LIST_OPERATION: &str = "Error requesting task info objects";

/// A task as listed by its service: a bare name, or a full description when
/// the server was asked for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskEntry {
    Name(String),
    Info(TaskInfo),
}

impl TaskEntry {
    pub fn name(&self) -> &str {
        match self {
            TaskEntry::Name(name) => name,
            TaskEntry::Info(info) => &info.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

/// A named collection of tasks on the server.
#[derive(Clone)]
pub struct ServiceHandle {
    name: String,
    core: Arc<ClientCore>,
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle").field("name", &self.name).finish()
    }
}

impl ServiceHandle {
    pub(crate) fn new(core: Arc<ClientCore>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            core,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn service_url(&self) -> String {
        self.core
            .url(&[SERVICES_PATH, &urlencoding::encode(&self.name)])
    }

    pub async fn info(&self) -> Result<ServiceInfo> {
        self.core
            .execute_as(INFO_OPERATION, HttpRequest::get(self.service_url()))
            .await
    }

    /// Handles for every task the service offers.
    pub async fn tasks(&self) -> Result<Vec<TaskHandle>> {
        let info: ServiceInfo = self
            .core
            .execute_as(TASKS_OPERATION, HttpRequest::get(self.service_url()))
            .await?;

        Ok(info
            .tasks
            .iter()
            .map(|entry| self.task(entry.name()))
            .collect())
    }

    /// Handle for one task. No request is made.
    pub fn task(&self, name: &str) -> TaskHandle {
        TaskHandle::new(self.core.clone(), self.name.clone(), name)
    }

    /// Full descriptions of every task in one request.
    ///
    /// Fails if the server answers with bare task names.
    pub async fn task_info_list(&self) -> Result<Vec<TaskInfo>> {
        let url = format!("{}?taskInfo=true", self.service_url());
        let info: ServiceInfo = self
            .core
            .execute_as(TASK_INFO_LIST_OPERATION, HttpRequest::get(url))
            .await?;

        info.tasks
            .into_iter()
            .map(|entry| match entry {
                TaskEntry::Info(info) => Ok(info),
                TaskEntry::Name(_) => Err(GridError::invalid_response(
                    TASK_INFO_LIST_OPERATION,
                    "Unable to get task info list.",
                )),
            })
            .collect()
    }
}
