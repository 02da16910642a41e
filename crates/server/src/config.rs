// crates/server/src/config.rs
//! Server tunables, read from environment variables with compiled defaults.

use std::time::Duration;

/// Default port for the server.
const DEFAULT_PORT: u16 = 47310;

/// Runtime configuration for streaming, cleanup, and backpressure behavior.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port (`JOBTAIL_PORT`, then `PORT`).
    pub port: u16,
    /// Outbound event buffer per subscription; a client that falls this far
    /// behind is disconnected (`JOBTAIL_BUFFER_CAPACITY`).
    pub buffer_capacity: usize,
    /// Reconnect delay hint sent on the SSE stream (`JOBTAIL_RETRY_MILLIS`).
    pub retry_hint: Duration,
    /// SSE comment keep-alive interval (`JOBTAIL_KEEP_ALIVE_SECS`).
    pub keep_alive: Duration,
    /// How often a delivery loop re-reads the log even without a publish
    /// notification (`JOBTAIL_FALLBACK_POLL_SECS`). Covers dropped or
    /// unavailable notifications.
    pub fallback_poll: Duration,
    /// Subscriptions with no delivery for this long are force-closed
    /// (`JOBTAIL_IDLE_TIMEOUT_SECS`).
    pub idle_timeout: Duration,
    /// How long a terminal job's log stays readable for late resumers
    /// (`JOBTAIL_GRACE_SECS`).
    pub grace_period: Duration,
    /// A running job with no append for this long gets a synthesized error
    /// event (`JOBTAIL_STALL_TIMEOUT_SECS`).
    pub stall_timeout: Duration,
    /// Cleanup supervisor sweep interval (`JOBTAIL_SWEEP_SECS`).
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: get_port(),
            buffer_capacity: env_parse("JOBTAIL_BUFFER_CAPACITY", 32).max(1),
            retry_hint: Duration::from_millis(env_parse("JOBTAIL_RETRY_MILLIS", 3_000)),
            keep_alive: Duration::from_secs(env_parse("JOBTAIL_KEEP_ALIVE_SECS", 15)),
            fallback_poll: Duration::from_secs(env_parse("JOBTAIL_FALLBACK_POLL_SECS", 2)),
            idle_timeout: Duration::from_secs(env_parse("JOBTAIL_IDLE_TIMEOUT_SECS", 300)),
            grace_period: Duration::from_secs(env_parse("JOBTAIL_GRACE_SECS", 600)),
            stall_timeout: Duration::from_secs(env_parse("JOBTAIL_STALL_TIMEOUT_SECS", 120)),
            sweep_interval: Duration::from_secs(env_parse("JOBTAIL_SWEEP_SECS", 30)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            buffer_capacity: 32,
            retry_hint: Duration::from_millis(3_000),
            keep_alive: Duration::from_secs(15),
            fallback_poll: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(300),
            grace_period: Duration::from_secs(600),
            stall_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("JOBTAIL_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert!(config.buffer_capacity >= 1);
        assert!(config.fallback_poll < config.idle_timeout);
        assert!(config.sweep_interval < config.grace_period);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        // Variable not set
        assert_eq!(env_parse("JOBTAIL_TEST_UNSET_VAR", 7u64), 7);
    }
}
