// crates/core/src/event.rs
//! Progress events: the immutable, sequence-numbered records that make up a
//! job's log, plus their self-describing wire JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::job::{JobId, JobStatus};

/// Kind tag carried on every streamed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Log,
    Complete,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Log => "log",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// A terminal event is the last event ever appended to a job's log.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress" => Ok(Self::Progress),
            "log" => Ok(Self::Log),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

/// Kind-specific event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Percent complete plus the job status and a human-readable message.
    Progress {
        percent: u8,
        status: JobStatus,
        message: String,
    },
    /// One free-text log line.
    Log(String),
    /// Final result summary on normal completion.
    Complete { result: Value },
    /// Failure reason on unrecoverable error.
    Error { reason: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Progress { .. } => EventKind::Progress,
            Self::Log(_) => EventKind::Log,
            Self::Complete { .. } => EventKind::Complete,
            Self::Error { .. } => EventKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Serialize to the self-describing wire value streamed to clients.
    ///
    /// - progress → `{"progress":25,"status":"RUNNING","message":"..."}`
    /// - log      → bare JSON string
    /// - complete → `{"result":...}`
    /// - error    → `{"error":"..."}`
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Progress {
                percent,
                status,
                message,
            } => serde_json::json!({
                "progress": percent,
                "status": status,
                "message": message,
            }),
            Self::Log(line) => Value::String(line.clone()),
            Self::Complete { result } => serde_json::json!({ "result": result }),
            Self::Error { reason } => serde_json::json!({ "error": reason }),
        }
    }

    /// Decode a stored wire value back into a payload. Inverse of
    /// [`to_wire`](Self::to_wire) — the store persists exactly the wire form.
    pub fn from_wire(kind: EventKind, value: &Value) -> Result<Self, CoreError> {
        match kind {
            EventKind::Progress => {
                let percent = value
                    .get("progress")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| CoreError::malformed_payload("progress", "missing percent"))?
                    .min(100) as u8;
                let status = value
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("RUNNING")
                    .parse()?;
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Self::Progress {
                    percent,
                    status,
                    message,
                })
            }
            EventKind::Log => {
                let line = value
                    .as_str()
                    .ok_or_else(|| CoreError::malformed_payload("log", "expected string"))?;
                Ok(Self::Log(line.to_string()))
            }
            EventKind::Complete => {
                let result = value
                    .get("result")
                    .cloned()
                    .ok_or_else(|| CoreError::malformed_payload("complete", "missing result"))?;
                Ok(Self::Complete { result })
            }
            EventKind::Error => {
                let reason = value
                    .get("error")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::malformed_payload("error", "missing reason"))?
                    .to_string();
                Ok(Self::Error { reason })
            }
        }
    }
}

/// One immutable entry in a job's event log.
///
/// `seq` starts at 1 and is strictly increasing per job; it doubles as the
/// SSE event id used for resumption.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub seq: u64,
    pub payload: EventPayload,
    /// Unix millis at append time.
    pub created_at: i64,
}

impl JobEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}
