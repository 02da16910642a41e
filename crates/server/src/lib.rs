// crates/server/src/lib.rs
//! Jobtail server library.
//!
//! An Axum-based HTTP server that streams live progress of long-running
//! background jobs over SSE, with reconnect-friendly resumption, a durable
//! per-job event log, and deterministic resource cleanup.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod fanout;
pub mod routes;
pub mod state;
pub mod worker;

pub use config::Config;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, job submission, summary, SSE stream)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use jobtail_store::Database;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let db = Database::new_in_memory().await.expect("in-memory DB");
        let config = Config {
            fallback_poll: Duration::from_millis(50),
            ..Config::default()
        };
        create_app(AppState::with_config(db, config))
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        request(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    /// Helper to make a GET request with extra headers.
    async fn get_with_header(
        app: Router,
        uri: &str,
        header: (&str, &str),
    ) -> (StatusCode, String) {
        let req = Request::builder()
            .uri(uri)
            .header(header.0, header.1)
            .body(Body::empty())
            .unwrap();
        request(app, req).await
    }

    /// Helper to POST a JSON body.
    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        request(app, req).await
    }

    async fn request(app: Router, req: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// Submit a job and return its id.
    async fn submit(app: &Router, body: &str) -> String {
        let (status, body) = post_json(app.clone(), "/api/jobs", body).await;
        assert_eq!(status, StatusCode::ACCEPTED, "submit failed: {body}");
        let json: Value = serde_json::from_str(&body).unwrap();
        json["jobId"].as_str().unwrap().to_string()
    }

    /// Poll the summary endpoint until the job reaches a terminal status.
    async fn wait_for_terminal(app: &Router, job_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = get(app.clone(), &format!("/api/jobs/{job_id}")).await;
            assert_eq!(status, StatusCode::OK);
            let json: Value = serde_json::from_str(&body).unwrap();
            if json["status"] == "COMPLETED" || json["status"] == "FAILED" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not reach a terminal state");
    }

    // ========================================================================
    // Health Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app().await;
        let (status, body) = get(app, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"version\""));
        assert!(body.contains("\"uptime_secs\""));
        assert!(body.contains("\"active_streams\":0"));
    }

    // ========================================================================
    // Submission & Summary Tests
    // ========================================================================

    #[tokio::test]
    async fn test_submit_and_poll_to_completion() {
        let app = test_app().await;
        let job_id = submit(&app, r#"{"steps":2,"stepDelayMs":0}"#).await;

        let summary = wait_for_terminal(&app, &job_id).await;
        assert_eq!(summary["status"], "COMPLETED");
        assert_eq!(summary["percent"], 100);
        assert_eq!(summary["jobId"], Value::String(job_id));
    }

    #[tokio::test]
    async fn test_submit_with_failure_injection() {
        let app = test_app().await;
        let job_id = submit(&app, r#"{"steps":5,"failAtStep":3,"stepDelayMs":0}"#).await;

        let summary = wait_for_terminal(&app, &job_id).await;
        assert_eq!(summary["status"], "FAILED");
        assert!(summary["message"].as_str().unwrap().contains("step 3"));
    }

    #[tokio::test]
    async fn test_submit_rejects_zero_steps() {
        let app = test_app().await;
        let (status, body) = post_json(app, "/api/jobs", r#"{"steps":0}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("steps"));
    }

    #[tokio::test]
    async fn test_summary_unknown_job_returns_404() {
        let app = test_app().await;
        let (status, body) = get(app, "/api/jobs/01JNOPE").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Job not found");
    }

    // ========================================================================
    // Streaming Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_stream_full_job_lifecycle() {
        let app = test_app().await;
        let job_id = submit(&app, r#"{"steps":2,"stepDelayMs":0}"#).await;

        // The stream ends once the terminal event is delivered, so reading
        // the whole body terminates.
        let (status, body) = get(app.clone(), &format!("/api/jobs/{job_id}/events")).await;
        assert_eq!(status, StatusCode::OK);

        assert!(body.contains("retry:"), "missing reconnect hint: {body}");
        assert!(body.contains("event: progress"));
        assert!(body.contains("\"progress\":50"));
        assert!(body.contains("\"progress\":100"));
        assert!(body.contains("event: log"));
        assert!(body.contains("event: complete"));
        assert!(body.contains("Success!"));

        // Ordered: first progress frame precedes the terminal frame.
        assert!(body.find("event: progress").unwrap() < body.find("event: complete").unwrap());
        // Sequence ids are present for resumption.
        assert!(body.contains("id: 1"));
    }

    #[tokio::test]
    async fn test_stream_unknown_job_returns_404_without_stream() {
        let app = test_app().await;
        let (status, body) = get(app, "/api/jobs/01JNOPE/events").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Job not found");
    }

    #[tokio::test]
    async fn test_stream_resumes_after_last_event_id() {
        let app = test_app().await;
        let job_id = submit(&app, r#"{"steps":2,"stepDelayMs":0}"#).await;
        wait_for_terminal(&app, &job_id).await;

        // Full log is: 1 progress, 2 progress, 3 log, 4 complete.
        let (status, body) = get_with_header(
            app.clone(),
            &format!("/api/jobs/{job_id}/events"),
            ("last-event-id", "3"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert!(body.contains("id: 4"));
        assert!(body.contains("event: complete"));
        assert!(!body.contains("id: 1\n"), "duplicate of acknowledged event: {body}");
        assert!(!body.contains("event: progress"));
    }

    #[tokio::test]
    async fn test_stream_resume_via_query_parameter() {
        let app = test_app().await;
        let job_id = submit(&app, r#"{"steps":2,"stepDelayMs":0}"#).await;
        wait_for_terminal(&app, &job_id).await;

        let (status, body) =
            get(app.clone(), &format!("/api/jobs/{job_id}/events?after=3")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("id: 4"));
        assert!(!body.contains("event: progress"));
    }
}
