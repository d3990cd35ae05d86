//! Push-event plumbing.
//!
//! Events flow from the server's SSE stream → `EventBus` → listeners:
//! - `EventBus`: one per session; decodes named server messages into
//!   [`JobEvent`]s and synthesizes `Completed` after `Succeeded`/`Failed`
//! - `ListenerTable`: the uncapped publish/subscribe table behind both the
//!   bus and every job handle
//! - `event_types`: event kinds and their session/job names

mod event_bus;
mod event_types;
mod listeners;

pub use event_bus::EventBus;
pub use event_types::{
    JobEvent, JobEventKind, EVENT_JOB_ACCEPTED, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED,
    EVENT_JOB_PROGRESS, EVENT_JOB_STARTED, EVENT_JOB_SUCCEEDED,
};
pub use listeners::{Handler, ListenerId, ListenerTable};
