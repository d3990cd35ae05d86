//! Common test utilities for Grid client integration tests.

#![allow(dead_code)]

pub mod mock_events;
pub mod mock_transport;

pub use mock_events::MockEventSource;
pub use mock_transport::{MockGridServer, TaskPlan};
