// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jobtail_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                )
            }
            // Store-level "job not found" surfaces the same way as the
            // handler-level check, so connect-time races don't leak 500s.
            ApiError::Store(StoreError::JobNotFound(id)) => {
                tracing::warn!(job_id = %id, "Job not found in store");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                )
            }
            ApiError::Store(store_err) => {
                tracing::error!(error = %store_err, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Storage error", store_err.to_string()),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    /// Helper to extract status code and body from a response
    async fn extract_response(response: Response) -> (StatusCode, ErrorResponse) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error_response: ErrorResponse = serde_json::from_slice(&body).unwrap();
        (status, error_response)
    }

    #[tokio::test]
    async fn test_job_not_found_returns_404() {
        let error = ApiError::JobNotFound("01JABC".to_string());
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "Job not found");
        assert!(body.details.unwrap().contains("01JABC"));
    }

    #[tokio::test]
    async fn test_store_job_not_found_returns_404() {
        let error = ApiError::Store(StoreError::JobNotFound("01JDEF".to_string()));
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "Job not found");
    }

    #[tokio::test]
    async fn test_store_error_returns_500() {
        let error = ApiError::Store(StoreError::NoDataDir);
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Storage error");
    }

    #[tokio::test]
    async fn test_bad_request_returns_400() {
        let error = ApiError::BadRequest("steps must be >= 1".to_string());
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.details.unwrap().contains("steps"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::new("Test error");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\":\"Test error\""));
        assert!(!json.contains("details")); // None should be skipped
    }
}
