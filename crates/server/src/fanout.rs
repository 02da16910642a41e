// crates/server/src/fanout.rs
//! Connection registry and per-subscription delivery loops.
//!
//! Each streaming client gets its own delivery task and its own bookmark of
//! the last sequence it received. A task wakes on publish notifications (or
//! a periodic fallback tick when notifications are dropped or unavailable)
//! and re-reads the log strictly after its bookmark — the notification
//! payload is never trusted as the source of ordering. Delivering the
//! terminal event ends the stream.
//!
//! Backpressure: the outbound buffer per subscription is bounded and filled
//! with `try_send`. A client that falls too far behind is disconnected so it
//! can never stall delivery to siblings or block the append path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use jobtail_core::{now_millis, JobEvent, JobId};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

/// Live subscriptions attached to this engine instance.
///
/// Entries are a cache of who is connected here, used by the cleanup
/// supervisor for idle eviction; all durable state lives in the store.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    entries: RwLock<HashMap<u64, SubscriptionEntry>>,
}

#[derive(Debug)]
struct SubscriptionEntry {
    job_id: JobId,
    last_activity: Arc<AtomicI64>,
    cancel: CancellationToken,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(registry: &Arc<Self>, job_id: &str) -> SubscriptionHandle {
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        let last_activity = Arc::new(AtomicI64::new(now_millis()));
        let cancel = CancellationToken::new();

        match registry.entries.write() {
            Ok(mut entries) => {
                entries.insert(
                    id,
                    SubscriptionEntry {
                        job_id: job_id.to_string(),
                        last_activity: Arc::clone(&last_activity),
                        cancel: cancel.clone(),
                    },
                );
            }
            Err(e) => tracing::error!("RwLock poisoned registering subscription: {e}"),
        }

        SubscriptionHandle {
            id,
            registry: Arc::clone(registry),
            last_activity,
            cancel,
        }
    }

    fn deregister(&self, id: u64) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.remove(&id);
            }
            Err(e) => tracing::error!("RwLock poisoned deregistering subscription: {e}"),
        }
    }

    /// Number of live subscriptions on this instance.
    pub fn active_count(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(e) => {
                tracing::error!("RwLock poisoned counting subscriptions: {e}");
                0
            }
        }
    }

    /// Number of live subscriptions for one job.
    pub fn count_for_job(&self, job_id: &str) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.values().filter(|s| s.job_id == job_id).count(),
            Err(e) => {
                tracing::error!("RwLock poisoned counting subscriptions: {e}");
                0
            }
        }
    }

    /// Cancel every subscription with no delivery since `cutoff` (unix
    /// millis). Returns how many were cancelled; the entries themselves are
    /// removed when their delivery tasks exit.
    pub fn evict_idle(&self, cutoff: i64) -> usize {
        match self.entries.read() {
            Ok(entries) => {
                let mut evicted = 0;
                for entry in entries.values() {
                    if entry.last_activity.load(Ordering::Relaxed) < cutoff {
                        entry.cancel.cancel();
                        evicted += 1;
                    }
                }
                evicted
            }
            Err(e) => {
                tracing::error!("RwLock poisoned evicting subscriptions: {e}");
                0
            }
        }
    }
}

/// Owned by a delivery task; deregisters on drop so every exit path —
/// terminal delivery, client gone, buffer overflow, idle eviction —
/// releases the registry entry in the same step.
struct SubscriptionHandle {
    id: u64,
    registry: Arc<SubscriptionRegistry>,
    last_activity: Arc<AtomicI64>,
    cancel: CancellationToken,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// Open an ordered event stream for a job, resuming strictly after
/// `last_seen` (0 for the full backlog).
///
/// Validates the job first: unknown ids get `JobNotFound` and no
/// subscription is ever created. The publish channel is subscribed *before*
/// the backlog read so no event can fall between backlog and live tail.
pub async fn subscribe(
    state: &Arc<AppState>,
    job_id: &str,
    last_seen: u64,
) -> Result<ReceiverStream<JobEvent>, ApiError> {
    if state.db.read_summary(job_id).await?.is_none() {
        return Err(ApiError::JobNotFound(job_id.to_string()));
    }

    let notify_rx = state.hub.subscribe(job_id);
    let (tx, rx) = mpsc::channel(state.config.buffer_capacity);
    let handle = SubscriptionRegistry::register(&state.registry, job_id);

    tracing::debug!(job_id = %job_id, last_seen, "subscription opened");
    tokio::spawn(deliver(
        Arc::clone(state),
        job_id.to_string(),
        last_seen,
        notify_rx,
        tx,
        handle,
    ));

    Ok(ReceiverStream::new(rx))
}

enum Wake {
    Notified,
    Fallback,
    ChannelClosed,
    Evicted,
}

enum Drain {
    Continue,
    Terminal,
    ClientGone,
}

async fn deliver(
    state: Arc<AppState>,
    job_id: JobId,
    last_seen: u64,
    mut notify_rx: broadcast::Receiver<u64>,
    tx: mpsc::Sender<JobEvent>,
    handle: SubscriptionHandle,
) {
    let mut bookmark = last_seen;

    // Backlog first, in order, before anything live.
    match drain(&state, &job_id, &mut bookmark, &tx, &handle).await {
        Drain::Continue => {}
        Drain::Terminal | Drain::ClientGone => return,
    }

    let mut fallback = tokio::time::interval(state.config.fallback_poll);
    fallback.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    fallback.tick().await; // the first tick completes immediately

    loop {
        let wake = tokio::select! {
            _ = handle.cancel.cancelled() => Wake::Evicted,
            res = notify_rx.recv() => match res {
                Ok(_) => Wake::Notified,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Coalesced notifications; the log re-read below
                    // recovers everything we were told about and more.
                    tracing::debug!(job_id = %job_id, skipped, "notification channel lagged");
                    Wake::Notified
                }
                Err(broadcast::error::RecvError::Closed) => Wake::ChannelClosed,
            },
            _ = fallback.tick() => Wake::Fallback,
        };

        if matches!(wake, Wake::Evicted) {
            tracing::info!(job_id = %job_id, "subscription closed: idle eviction");
            return;
        }

        match drain(&state, &job_id, &mut bookmark, &tx, &handle).await {
            Drain::Continue => {}
            Drain::Terminal | Drain::ClientGone => return,
        }

        if matches!(wake, Wake::ChannelClosed) {
            // The job's channel was reclaimed; nothing more will arrive.
            tracing::debug!(job_id = %job_id, "publish channel closed, ending stream");
            return;
        }
    }
}

/// Read everything after the bookmark and push it to the client, advancing
/// the bookmark per delivered event.
async fn drain(
    state: &AppState,
    job_id: &str,
    bookmark: &mut u64,
    tx: &mpsc::Sender<JobEvent>,
    handle: &SubscriptionHandle,
) -> Drain {
    let events = match state.db.read_from(job_id, *bookmark).await {
        Ok(events) => events,
        Err(e) => {
            // Degraded, not fatal: the bookmark is untouched, so the next
            // wake-up re-reads from the same point and nothing is skipped.
            tracing::warn!(job_id = %job_id, error = %e, "log read failed, retrying on next wake-up");
            return Drain::Continue;
        }
    };

    for event in events {
        let seq = event.seq;
        let terminal = event.is_terminal();
        match tx.try_send(event) {
            Ok(()) => {
                *bookmark = seq;
                handle.last_activity.store(now_millis(), Ordering::Relaxed);
                if terminal {
                    tracing::debug!(job_id = %job_id, seq, "terminal event delivered, closing stream");
                    return Drain::Terminal;
                }
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    job_id = %job_id,
                    seq,
                    "slow client: outbound buffer full, dropping subscription"
                );
                return Drain::ClientGone;
            }
            Err(TrySendError::Closed(_)) => return Drain::ClientGone,
        }
    }
    Drain::Continue
}
