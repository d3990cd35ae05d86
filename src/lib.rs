//! Client SDK for the Grid asynchronous job service.
//!
//! A [`GridClient`] holds one session with a server. It discovers services
//! and tasks, submits tasks as jobs, and observes job lifecycles through both
//! status polling and the server's event stream.
//!
//! # Architecture
//!
//! - `config`: connection settings and URL assembly
//! - `transport`: the HTTP and event-stream collaborators
//! - `bus`: session-wide event demultiplexing and listener tables
//! - `job`: job handles, status snapshots and the wait reconciliation
//! - `catalog`: services, tasks and job submission
//! - `client`: the session and job listing
//!
//! # Example
//!
//! ```no_run
//! use grid_sdk::{ClientConfig, GridClient, JobCallbacks, SubmitOptions};
//!
//! # async fn run() -> grid_sdk::Result<()> {
//! let client = GridClient::new(ClientConfig::new("localhost").with_port(9191))?;
//! let task = client.service("javascript").task("Sleep");
//! let results = task
//!     .submit_and_wait(SubmitOptions::new().input("INPUT_INTEGER", 42), JobCallbacks::new())
//!     .await?;
//! println!("{:?}", results.get("OUTPUT"));
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bus::{JobEvent, JobEventKind, ListenerId};
pub use catalog::{ServiceHandle, ServiceInfo, SubmitOptions, TaskHandle, TaskInfo};
pub use client::{GridClient, JobList, JobListOptions, JobSearch};
pub use config::{ClientConfig, EventHeaderMode};
pub use error::{GridError, Result};
pub use job::{JobCallbacks, JobHandle, JobId, JobInfo, JobStatus, ResultBindings};

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_directive`. Does nothing if a
/// global subscriber is already set.
pub fn init_tracing(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .try_init();
}
