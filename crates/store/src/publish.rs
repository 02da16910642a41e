// crates/store/src/publish.rs
//! Per-job publish channel: wakes streaming consumers when a new event has
//! been appended, without them polling the log.
//!
//! Delivery is at-most-once and may lag or drop under load. Consumers must
//! re-read the log from their own bookmark on every wake-up and never trust
//! the notified sequence number alone — correctness lives in the store.

use std::collections::HashMap;
use std::sync::RwLock;

use jobtail_core::JobId;
use tokio::sync::broadcast;

/// Buffered notifications per job channel. Small on purpose — a lagging
/// consumer recovers by re-reading the log, not by draining a deep buffer.
const CHANNEL_CAPACITY: usize = 64;

/// One lazily-created broadcast channel per job.
#[derive(Debug, Default)]
pub struct PublishHub {
    channels: RwLock<HashMap<JobId, broadcast::Sender<u64>>>,
}

impl PublishHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify subscribers that the event at `seq` now exists. Fire-and-forget:
    /// no subscribers (or no channel yet) is fine.
    pub fn publish(&self, job_id: &str, seq: u64) {
        match self.channels.read() {
            Ok(channels) => {
                if let Some(tx) = channels.get(job_id) {
                    // Ignore send errors (no live receivers is fine).
                    let _ = tx.send(seq);
                }
            }
            Err(e) => tracing::error!("RwLock poisoned publishing notification: {e}"),
        }
    }

    /// Subscribe to notifications for a job, creating its channel if needed.
    /// Unsubscribing is implicit — drop the receiver.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<u64> {
        match self.channels.write() {
            Ok(mut channels) => channels
                .entry(job_id.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe(),
            Err(e) => {
                tracing::error!("RwLock poisoned subscribing: {e}");
                // Orphan channel: the receiver simply never fires, and the
                // consumer's fallback re-read keeps it correct.
                broadcast::channel(CHANNEL_CAPACITY).1
            }
        }
    }

    /// Drop a job's channel, closing all outstanding receivers.
    pub fn remove(&self, job_id: &str) {
        match self.channels.write() {
            Ok(mut channels) => {
                channels.remove(job_id);
            }
            Err(e) => tracing::error!("RwLock poisoned removing channel: {e}"),
        }
    }

    /// Number of live per-job channels (for tests and introspection).
    pub fn channel_count(&self) -> usize {
        match self.channels.read() {
            Ok(channels) => channels.len(),
            Err(e) => {
                tracing::error!("RwLock poisoned counting channels: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = PublishHub::new();
        let mut rx = hub.subscribe("job-1");

        hub.publish("job-1", 1);
        hub.publish("job-1", 2);

        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let hub = PublishHub::new();
        // No channel, no subscribers — must not panic or create state.
        hub.publish("nobody-home", 7);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_channels_are_per_job() {
        let hub = PublishHub::new();
        let mut rx_a = hub.subscribe("a");
        let mut rx_b = hub.subscribe("b");

        hub.publish("a", 5);

        assert_eq!(rx_a.recv().await.unwrap(), 5);
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_remove_closes_receivers() {
        let hub = PublishHub::new();
        let mut rx = hub.subscribe("gone");
        hub.remove("gone");

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let hub = PublishHub::new();
        let mut rx = hub.subscribe("busy");

        // Overflow the channel; publish must never block the producer.
        for seq in 0..(CHANNEL_CAPACITY as u64 + 10) {
            hub.publish("busy", seq);
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
