// crates/server/src/worker.rs
//! Worker update pipeline: owns a job's execution as a single-writer state
//! machine (`PENDING → RUNNING → {COMPLETED | FAILED}`).
//!
//! Every increment appends to the log and then publishes a wake-up. Exactly
//! one terminal event is ever appended, and once it is, the reporter refuses
//! further appends.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobtail_core::{EventPayload, JobId, JobStatus};
use jobtail_store::{Database, PublishHub, StoreError, StoreResult};
use serde_json::Value;
use tokio::task::JoinHandle;

/// Append retry attempts before a store failure is treated as fatal to the
/// current step.
const APPEND_ATTEMPTS: u32 = 3;
const APPEND_BACKOFF: Duration = Duration::from_millis(50);

/// Handle a job's work closure uses to report increments.
///
/// Percent is clamped to 0–100 and never regresses; appends after the
/// terminal event return `TerminalJob`.
pub struct ProgressReporter {
    db: Database,
    hub: Arc<PublishHub>,
    job_id: JobId,
    last_percent: AtomicU8,
    finished: AtomicBool,
}

impl ProgressReporter {
    fn new(db: Database, hub: Arc<PublishHub>, job_id: JobId) -> Self {
        Self {
            db,
            hub,
            job_id,
            last_percent: AtomicU8::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Append a `progress` event. Returns the assigned sequence number.
    pub async fn progress(&self, percent: u8, message: impl Into<String>) -> StoreResult<u64> {
        let percent = percent
            .min(100)
            .max(self.last_percent.load(Ordering::Relaxed));
        let seq = self
            .emit(EventPayload::Progress {
                percent,
                status: JobStatus::Running,
                message: message.into(),
            })
            .await?;
        self.last_percent.fetch_max(percent, Ordering::Relaxed);
        Ok(seq)
    }

    /// Append a free-text `log` event.
    pub async fn log(&self, line: impl Into<String>) -> StoreResult<u64> {
        self.emit(EventPayload::Log(line.into())).await
    }

    async fn emit(&self, payload: EventPayload) -> StoreResult<u64> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(StoreError::TerminalJob(self.job_id.clone()));
        }
        let outcome = append_with_retry(&self.db, &self.job_id, &payload).await?;
        self.hub.publish(&self.job_id, outcome.seq);
        Ok(outcome.seq)
    }

    /// Append the single `complete` event. Idempotent: only the first
    /// terminal call for a reporter does anything.
    async fn complete(&self, result: Value) {
        self.finish(EventPayload::Complete { result }).await;
    }

    /// Append the single `error` event.
    async fn fail(&self, reason: String) {
        self.finish(EventPayload::Error { reason }).await;
    }

    async fn finish(&self, payload: EventPayload) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        match append_with_retry(&self.db, &self.job_id, &payload).await {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %self.job_id,
                    seq = outcome.seq,
                    kind = %payload.kind(),
                    "job reached terminal state"
                );
                self.hub.publish(&self.job_id, outcome.seq);
            }
            // TerminalJob here means someone else (the cleanup supervisor's
            // stall synthesis) already closed the log; the job is terminal
            // either way.
            Err(StoreError::TerminalJob(_)) => {}
            Err(e) => {
                tracing::error!(
                    job_id = %self.job_id,
                    error = %e,
                    "failed to append terminal event; clients must rely on idle cleanup"
                );
            }
        }
    }
}

/// Retry transient store failures with backoff; anything else is immediate.
async fn append_with_retry(
    db: &Database,
    job_id: &str,
    payload: &EventPayload,
) -> StoreResult<jobtail_store::AppendOutcome> {
    let mut backoff = APPEND_BACKOFF;
    let mut attempt = 1;
    loop {
        match db.append(job_id, payload).await {
            Ok(outcome) => return Ok(outcome),
            Err(StoreError::Sqlx(e)) if attempt < APPEND_ATTEMPTS => {
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    error = %e,
                    "append failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a job to its terminal state.
///
/// The work closure reports increments through the [`ProgressReporter`]; its
/// return value decides the terminal event: `Ok(result)` appends `complete`,
/// `Err(reason)` appends `error`. A store failure inside a step surfaces as
/// `Err` through the closure (fatal to the step), so the job fails loudly
/// instead of silently losing events.
pub async fn run_job<F, Fut>(db: Database, hub: Arc<PublishHub>, job_id: JobId, work: F)
where
    F: FnOnce(Arc<ProgressReporter>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Value, String>> + Send + 'static,
{
    if let Err(e) = db.mark_running(&job_id).await {
        tracing::error!(job_id = %job_id, error = %e, "could not start job");
        return;
    }

    let reporter = Arc::new(ProgressReporter::new(db, hub, job_id));
    match work(Arc::clone(&reporter)).await {
        Ok(result) => reporter.complete(result).await,
        Err(reason) => reporter.fail(reason).await,
    }
}

/// Shape of the built-in simulated job used by the submission endpoint.
#[derive(Debug, Clone)]
pub struct SimulatedJob {
    /// Number of discrete work steps.
    pub steps: u32,
    /// Fail at this 1-based step instead of completing, if set.
    pub fail_at_step: Option<u32>,
    /// Pause between steps.
    pub step_delay: Duration,
}

impl Default for SimulatedJob {
    fn default() -> Self {
        Self {
            steps: 4,
            fail_at_step: None,
            step_delay: Duration::from_millis(250),
        }
    }
}

/// Spawn a simulated stepped worker for a freshly-submitted job.
pub fn spawn_simulated(
    db: Database,
    hub: Arc<PublishHub>,
    job_id: JobId,
    spec: SimulatedJob,
) -> JoinHandle<()> {
    tokio::spawn(run_job(db, hub, job_id, move |reporter| async move {
        let steps = spec.steps.max(1);
        for step in 1..=steps {
            if spec.step_delay > Duration::ZERO {
                tokio::time::sleep(spec.step_delay).await;
            }
            if spec.fail_at_step == Some(step) {
                return Err(format!("step {step} of {steps} failed"));
            }
            let percent = (step * 100 / steps) as u8;
            reporter
                .progress(percent, format!("Step {step} of {steps}"))
                .await
                .map_err(|e| e.to_string())?;
            if step % 2 == 0 {
                reporter
                    .log(format!("finished step {step}"))
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(Value::String("Success!".to_string()))
    }))
}
