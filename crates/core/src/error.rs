// crates/core/src/error.rs
use thiserror::Error;

/// Errors decoding stored job/event data back into domain types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    #[error("Malformed {kind} payload: {message}")]
    MalformedPayload { kind: String, message: String },
}

impl CoreError {
    pub fn malformed_payload(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
