//! Service and task discovery, and job submission.

mod service;
mod task;

pub use service::{ServiceHandle, ServiceInfo, TaskEntry};
pub use task::{
    JobOptions, ParameterDirection, SubmitOptions, TaskHandle, TaskInfo, TaskParameter,
};
