// crates/core/src/lib.rs
//! Core domain types for jobtail: jobs, progress events, and their wire
//! representations. Shared by the store and server crates.

pub mod error;
pub mod event;
pub mod job;

pub use error::CoreError;
pub use event::{EventKind, EventPayload, JobEvent};
pub use job::{new_job_id, JobId, JobStatus, JobSummary};

/// Current unix time in milliseconds. All stored timestamps use this scale.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
