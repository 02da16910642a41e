// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use jobtail_store::{Database, PublishHub};

use crate::config::Config;
use crate::fanout::SubscriptionRegistry;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Durable event log + summary store.
    pub db: Database,
    /// Per-job publish channels (wake-ups for streaming delivery loops).
    pub hub: Arc<PublishHub>,
    /// Live subscriptions attached to this engine instance. Purely a local
    /// cache of "who is connected here" — ordering truth lives in `db`.
    pub registry: Arc<SubscriptionRegistry>,
    /// Runtime tunables.
    pub config: Config,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(db: Database) -> Arc<Self> {
        Self::with_config(db, Config::default())
    }

    /// Create with explicit configuration (tests tune timeouts and buffers).
    pub fn with_config(db: Database, config: Config) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            hub: Arc::new(PublishHub::new()),
            registry: Arc::new(SubscriptionRegistry::new()),
            config,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
