//! Jobs: identifiers, status snapshots and the per-job handle.
//!
//! A [`JobHandle`] reconciles two views of the same job:
//! - pull: [`JobHandle::info`] fetches a normalized [`JobInfo`]
//! - push: session events routed to the job by its `JobEventRouter`
//!
//! [`JobHandle::wait`] races both and settles exactly once.

mod handle;
mod id;
mod info;
mod router;

pub use handle::{JobCallbacks, JobHandle};
pub use id::JobId;
pub use info::{JobInfo, JobStatus, ResultBindings};
