// crates/core/src/job.rs
//! Job identity, status state machine, and the summary projection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Opaque unique job identifier, generated at submission.
pub type JobId = String;

/// Generate a fresh job id (ULID — sortable, URL-safe, collision-free).
pub fn new_job_id() -> JobId {
    ulid::Ulid::new().to_string()
}

/// Lifecycle status of a job.
///
/// Transitions: `Pending → Running → {Completed | Failed}`. Terminal states
/// absorb — nothing moves a job out of `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Current state of a job, derived from its event log.
///
/// This is a projection: the log is the truth, the summary is what the
/// fallback status endpoint serves without replaying events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Percent complete, 0–100, monotonically non-decreasing while running.
    pub percent: u8,
    /// Latest human-readable progress or failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix millis at submission.
    pub created_at: i64,
    /// Unix millis of the latest append (or submission if none yet).
    pub updated_at: i64,
    /// Unix millis of the terminal event append, once one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<i64>,
}
