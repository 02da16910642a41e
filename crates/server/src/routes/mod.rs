//! API route handlers for the jobtail server.

pub mod health;
pub mod jobs;
pub mod stream;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health            - Health check
/// - POST /api/jobs              - Submit a job, returns its id
/// - GET  /api/jobs/:id          - Job summary snapshot (polling fallback)
/// - GET  /api/jobs/:id/events   - SSE stream of the job's events, resumable
///                                 via `Last-Event-ID` or `?after=`
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", stream::router())
        .with_state(state)
}
