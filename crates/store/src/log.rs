// crates/store/src/log.rs
//! Append-only event log operations and the summary projection.
//!
//! Sequence assignment happens inside the INSERT itself
//! (`COALESCE(MAX(seq), 0) + 1`), so two concurrent appends for the same job
//! can never receive the same number — SQLite serializes the writes.

use jobtail_core::{now_millis, EventPayload, JobEvent, JobId, JobStatus, JobSummary};

use crate::{Database, StoreError, StoreResult};

/// Result of a successful append.
#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    /// Sequence number assigned to the new event (starts at 1 per job).
    pub seq: u64,
    /// Unix millis recorded on the event.
    pub created_at: i64,
}

impl Database {
    /// Create the summary row for a newly-submitted job in `PENDING`.
    ///
    /// Must happen before any connect request for the id — the streaming
    /// endpoint validates jobs against this row.
    pub async fn create_job(&self, job_id: &str) -> StoreResult<()> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO jobs (id, status, percent, created_at, updated_at)
             VALUES (?, 'PENDING', 0, ?, ?)",
        )
        .bind(job_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append one event to a job's log and update the summary projection,
    /// atomically. Returns the assigned sequence number.
    ///
    /// Refuses to append to an unknown job (`JobNotFound`) or past a
    /// terminal event (`TerminalJob`) — the terminal event is always the
    /// last entry in the log.
    pub async fn append(
        &self,
        job_id: &str,
        payload: &EventPayload,
    ) -> StoreResult<AppendOutcome> {
        let mut tx = self.pool().begin().await?;

        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        let status: JobStatus = match status {
            None => return Err(StoreError::JobNotFound(job_id.to_string())),
            Some((s,)) => s.parse()?,
        };
        if status.is_terminal() {
            return Err(StoreError::TerminalJob(job_id.to_string()));
        }

        let now = now_millis();
        let wire = payload.to_wire().to_string();

        let (seq,): (i64,) = sqlx::query_as(
            "INSERT INTO job_events (job_id, seq, kind, payload, created_at)
             SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?
             FROM job_events WHERE job_id = ?
             RETURNING seq",
        )
        .bind(job_id)
        .bind(payload.kind().as_str())
        .bind(&wire)
        .bind(now)
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        // Keep the summary row in step with the log inside the same
        // transaction, so a summary read never races ahead of the backlog.
        match payload {
            EventPayload::Progress {
                percent, message, ..
            } => {
                sqlx::query(
                    "UPDATE jobs SET status = 'RUNNING', percent = MAX(percent, ?),
                     message = ?, updated_at = ? WHERE id = ?",
                )
                .bind(*percent as i64)
                .bind(message)
                .bind(now)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            EventPayload::Log(_) => {
                sqlx::query("UPDATE jobs SET updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(job_id)
                    .execute(&mut *tx)
                    .await?;
            }
            EventPayload::Complete { .. } => {
                sqlx::query(
                    "UPDATE jobs SET status = 'COMPLETED', percent = 100,
                     updated_at = ?, terminal_at = ? WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            EventPayload::Error { reason } => {
                sqlx::query(
                    "UPDATE jobs SET status = 'FAILED', message = ?,
                     updated_at = ?, terminal_at = ? WHERE id = ?",
                )
                .bind(reason)
                .bind(now)
                .bind(now)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(AppendOutcome {
            seq: seq as u64,
            created_at: now,
        })
    }

    /// Transition a `PENDING` job to `RUNNING`. Idempotent — a job already
    /// running (or terminal) is left untouched.
    pub async fn mark_running(&self, job_id: &str) -> StoreResult<()> {
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'RUNNING', updated_at = ?
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(now_millis())
        .bind(job_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 0 && self.read_summary(job_id).await?.is_none() {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Read all events with `seq > after_seq`, in ascending order.
    /// `after_seq = 0` returns the full backlog.
    pub async fn read_from(&self, job_id: &str, after_seq: u64) -> StoreResult<Vec<JobEvent>> {
        let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT seq, kind, payload, created_at FROM job_events
             WHERE job_id = ? AND seq > ? ORDER BY seq ASC",
        )
        .bind(job_id)
        .bind(after_seq as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(seq, kind, payload, created_at)| {
                let kind: jobtail_core::EventKind = kind.parse()?;
                let value: serde_json::Value = serde_json::from_str(&payload).map_err(|e| {
                    jobtail_core::CoreError::malformed_payload(kind.as_str(), e.to_string())
                })?;
                Ok(JobEvent {
                    job_id: job_id.to_string(),
                    seq: seq as u64,
                    payload: EventPayload::from_wire(kind, &value)?,
                    created_at,
                })
            })
            .collect()
    }

    /// Read the current summary projection, or `None` for an unknown job.
    pub async fn read_summary(&self, job_id: &str) -> StoreResult<Option<JobSummary>> {
        let row: Option<(String, i64, Option<String>, i64, i64, Option<i64>)> = sqlx::query_as(
            "SELECT status, percent, message, created_at, updated_at, terminal_at
             FROM jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            None => Ok(None),
            Some((status, percent, message, created_at, updated_at, terminal_at)) => {
                Ok(Some(JobSummary {
                    job_id: job_id.to_string(),
                    status: status.parse()?,
                    percent: percent.clamp(0, 100) as u8,
                    message,
                    created_at,
                    updated_at,
                    terminal_at,
                }))
            }
        }
    }

    /// Delete a job's events and summary. No-op on an unknown id.
    pub async fn remove(&self, job_id: &str) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM job_events WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Jobs whose terminal event was appended before `cutoff` (unix millis).
    /// The cleanup supervisor removes these after the grace period.
    pub async fn terminal_jobs_older_than(&self, cutoff: i64) -> StoreResult<Vec<JobId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE terminal_at IS NOT NULL AND terminal_at < ?",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Running jobs with no append since `cutoff` (unix millis) — candidates
    /// for a supervisor-synthesized error event.
    pub async fn running_jobs_stalled_since(&self, cutoff: i64) -> StoreResult<Vec<JobId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE status = 'RUNNING' AND updated_at < ?",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtail_core::EventKind;
    use serde_json::json;

    fn progress(percent: u8, message: &str) -> EventPayload {
        EventPayload::Progress {
            percent,
            status: JobStatus::Running,
            message: message.to_string(),
        }
    }

    async fn db_with_job(job_id: &str) -> Database {
        let db = Database::new_in_memory().await.unwrap();
        db.create_job(job_id).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_sequences_start_at_one_and_increase() {
        let db = db_with_job("j").await;
        let a = db.append("j", &progress(10, "a")).await.unwrap();
        let b = db.append("j", &EventPayload::Log("line".into())).await.unwrap();
        let c = db.append("j", &progress(20, "c")).await.unwrap();
        assert_eq!((a.seq, b.seq, c.seq), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_sequences_independent_across_jobs() {
        let db = db_with_job("a").await;
        db.create_job("b").await.unwrap();
        db.append("a", &progress(10, "x")).await.unwrap();
        db.append("a", &progress(20, "y")).await.unwrap();
        let first_b = db.append("b", &progress(5, "z")).await.unwrap();
        assert_eq!(first_b.seq, 1);
    }

    #[tokio::test]
    async fn test_read_from_filters_strictly_greater() {
        let db = db_with_job("j").await;
        for i in 1..=5 {
            db.append("j", &progress(i * 10, "step")).await.unwrap();
        }

        let all = db.read_from("j", 0).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.first().unwrap().seq, 1);

        let tail = db.read_from("j", 3).await.unwrap();
        assert_eq!(tail.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_backlog_reread_is_idempotent() {
        let db = db_with_job("j").await;
        db.append("j", &progress(25, "a")).await.unwrap();
        db.append("j", &EventPayload::Log("b".into())).await.unwrap();
        db.append(
            "j",
            &EventPayload::Complete {
                result: json!("Success!"),
            },
        )
        .await
        .unwrap();

        let first = db.read_from("j", 0).await.unwrap();
        let second = db.read_from("j", 0).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_summary_projection_tracks_appends() {
        let db = db_with_job("j").await;
        let before = db.read_summary("j").await.unwrap().unwrap();
        assert_eq!(before.status, JobStatus::Pending);
        assert_eq!(before.percent, 0);

        db.append("j", &progress(40, "working")).await.unwrap();
        let mid = db.read_summary("j").await.unwrap().unwrap();
        assert_eq!(mid.status, JobStatus::Running);
        assert_eq!(mid.percent, 40);
        assert_eq!(mid.message.as_deref(), Some("working"));
        assert!(mid.terminal_at.is_none());

        db.append(
            "j",
            &EventPayload::Complete {
                result: json!("Success!"),
            },
        )
        .await
        .unwrap();
        let done = db.read_summary("j").await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.percent, 100);
        assert!(done.terminal_at.is_some());
    }

    #[tokio::test]
    async fn test_percent_never_regresses() {
        let db = db_with_job("j").await;
        db.append("j", &progress(60, "a")).await.unwrap();
        db.append("j", &progress(30, "late duplicate")).await.unwrap();
        let summary = db.read_summary("j").await.unwrap().unwrap();
        assert_eq!(summary.percent, 60);
    }

    #[tokio::test]
    async fn test_append_after_terminal_refused() {
        let db = db_with_job("j").await;
        db.append(
            "j",
            &EventPayload::Error {
                reason: "boom".into(),
            },
        )
        .await
        .unwrap();

        let err = db.append("j", &progress(99, "too late")).await.unwrap_err();
        assert!(matches!(err, StoreError::TerminalJob(_)));

        // Terminal event is still the last entry.
        let events = db.read_from("j", 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events.last().unwrap().kind(), EventKind::Error);
    }

    #[tokio::test]
    async fn test_append_to_unknown_job_refused() {
        let db = Database::new_in_memory().await.unwrap();
        let err = db.append("ghost", &progress(1, "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_running_idempotent() {
        let db = db_with_job("j").await;
        db.mark_running("j").await.unwrap();
        db.mark_running("j").await.unwrap();
        let summary = db.read_summary("j").await.unwrap().unwrap();
        assert_eq!(summary.status, JobStatus::Running);

        assert!(matches!(
            db.mark_running("ghost").await.unwrap_err(),
            StoreError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_remove_deletes_everything_and_is_noop_on_unknown() {
        let db = db_with_job("j").await;
        db.append("j", &progress(10, "a")).await.unwrap();

        db.remove("j").await.unwrap();
        assert!(db.read_summary("j").await.unwrap().is_none());
        assert!(db.read_from("j", 0).await.unwrap().is_empty());

        // Safe to call on a job that never existed.
        db.remove("never-there").await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_queries() {
        let db = db_with_job("done").await;
        db.create_job("stalled").await.unwrap();
        db.create_job("fresh").await.unwrap();

        db.append(
            "done",
            &EventPayload::Complete {
                result: json!(null),
            },
        )
        .await
        .unwrap();
        db.append("stalled", &progress(10, "x")).await.unwrap();
        db.append("fresh", &progress(10, "y")).await.unwrap();

        let future = now_millis() + 60_000;
        assert_eq!(db.terminal_jobs_older_than(future).await.unwrap(), vec!["done"]);
        assert!(db.terminal_jobs_older_than(0).await.unwrap().is_empty());

        let stalled = db.running_jobs_stalled_since(future).await.unwrap();
        assert!(stalled.contains(&"stalled".to_string()));
        assert!(stalled.contains(&"fresh".to_string()));
        assert!(!stalled.contains(&"done".to_string()));
        assert!(db.running_jobs_stalled_since(0).await.unwrap().is_empty());
    }
}
