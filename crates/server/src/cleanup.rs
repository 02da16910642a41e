// crates/server/src/cleanup.rs
//! Cleanup supervisor: best-effort background sweeps that reclaim what the
//! other components don't reclaim themselves.
//!
//! Each sweep: (1) synthesize an `error` event for running jobs whose worker
//! went silent, (2) remove the durable log of terminal jobs past the grace
//! period, (3) force-close idle subscriptions. Missing a sweep only delays
//! reclamation; it never corrupts state.

use std::sync::Arc;

use jobtail_core::{now_millis, EventPayload};
use jobtail_store::StoreError;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Spawn the periodic sweep loop.
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep(&state).await;
        }
    })
}

/// Run one sweep cycle. Public so tests (and shutdown paths) can drive it
/// directly without waiting for the interval.
pub async fn sweep(state: &AppState) {
    let now = now_millis();

    seal_stalled_jobs(state, now).await;
    reclaim_expired_jobs(state, now).await;

    let idle_cutoff = now - state.config.idle_timeout.as_millis() as i64;
    let evicted = state.registry.evict_idle(idle_cutoff);
    if evicted > 0 {
        tracing::info!(evicted, "closed idle subscriptions");
    }
}

/// A running job with no append past the stall timeout gets a synthesized
/// terminal `error` event, so attached clients are released instead of
/// hanging until idle eviction.
async fn seal_stalled_jobs(state: &AppState, now: i64) {
    let cutoff = now - state.config.stall_timeout.as_millis() as i64;
    let stalled = match state.db.running_jobs_stalled_since(cutoff).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "stall sweep query failed, skipping cycle");
            return;
        }
    };

    for job_id in stalled {
        let payload = EventPayload::Error {
            reason: "worker stalled: no progress within the stall timeout".to_string(),
        };
        match state.db.append(&job_id, &payload).await {
            Ok(outcome) => {
                tracing::warn!(job_id = %job_id, seq = outcome.seq, "synthesized error event for stalled job");
                state.hub.publish(&job_id, outcome.seq);
            }
            // The worker beat us to a terminal event between the query and
            // the append — exactly what we wanted anyway.
            Err(StoreError::TerminalJob(_)) | Err(StoreError::JobNotFound(_)) => {}
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "could not seal stalled job"),
        }
    }
}

/// Remove logs and summaries of terminal jobs past the grace period, and
/// drop their publish channels (closing any stragglers' receivers).
async fn reclaim_expired_jobs(state: &AppState, now: i64) {
    let cutoff = now - state.config.grace_period.as_millis() as i64;
    let expired = match state.db.terminal_jobs_older_than(cutoff).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "expiry sweep query failed, skipping cycle");
            return;
        }
    };

    for job_id in expired {
        match state.db.remove(&job_id).await {
            Ok(()) => {
                state.hub.remove(&job_id);
                tracing::info!(job_id = %job_id, "reclaimed expired job log");
            }
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "could not remove expired job"),
        }
    }
}
