// crates/server/src/routes/jobs.rs
//! Job submission intake and the polling fallback.
//!
//! - POST /jobs     — Submit a job; spawns the simulated worker
//! - GET  /jobs/:id — Current summary (status, percent, message)

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use jobtail_core::{new_job_id, JobSummary};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::worker::{self, SimulatedJob};

/// Body for job submission. All fields optional; defaults simulate a short
/// four-step job.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitJobRequest {
    /// Number of work steps (1–10_000).
    pub steps: Option<u32>,
    /// Fail at this 1-based step instead of completing (failure injection).
    pub fail_at_step: Option<u32>,
    /// Delay between steps in milliseconds.
    pub step_delay_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
}

/// POST /api/jobs — Submit a new job.
///
/// Creates the `PENDING` summary row first, then spawns the worker, so a
/// client can connect to the stream the moment it has the id.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let steps = req.steps.unwrap_or(4);
    if steps == 0 || steps > 10_000 {
        return Err(ApiError::BadRequest(format!(
            "steps must be between 1 and 10000, got {steps}"
        )));
    }

    let job_id = new_job_id();
    state.db.create_job(&job_id).await?;

    let spec = SimulatedJob {
        steps,
        fail_at_step: req.fail_at_step,
        step_delay: Duration::from_millis(req.step_delay_ms.unwrap_or(250)),
    };
    worker::spawn_simulated(
        state.db.clone(),
        Arc::clone(&state.hub),
        job_id.clone(),
        spec,
    );

    tracing::info!(job_id = %job_id, steps, "job submitted");
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
}

/// GET /api/jobs/:id — Summary snapshot for clients that cannot hold a
/// streaming connection.
pub async fn job_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    match state.db.read_summary(&id).await? {
        Some(summary) => Ok(Json(summary)),
        None => Err(ApiError::JobNotFound(id)),
    }
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(job_summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_defaults() {
        let req: SubmitJobRequest = serde_json::from_str("{}").unwrap();
        assert!(req.steps.is_none());
        assert!(req.fail_at_step.is_none());
    }

    #[test]
    fn test_submit_request_camel_case() {
        let req: SubmitJobRequest =
            serde_json::from_str(r#"{"steps":3,"failAtStep":2,"stepDelayMs":0}"#).unwrap();
        assert_eq!(req.steps, Some(3));
        assert_eq!(req.fail_at_step, Some(2));
        assert_eq!(req.step_delay_ms, Some(0));
    }
}
