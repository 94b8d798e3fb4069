//! Listener, connection, reaper and logging settings.

use serde::{Deserialize, Serialize};

/// Listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Port of the group A listener.
    pub group_a_port: u16,
    /// Port of the group B listener.
    pub group_b_port: u16,
    /// Bounded outbound queue length per connection.
    pub send_queue_capacity: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// A connection with no inbound traffic for this long is no longer live.
    /// Kept at or below [`ReaperSettings::interval_secs`] by validation.
    pub heartbeat_timeout_secs: u64,
    /// Dropped sends after which a slow consumer is disconnected.
    pub max_send_drops: u64,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for tasks before giving up.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            group_a_port: 8675,
            group_b_port: 8775,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 30,
            max_send_drops: 100,
            max_message_size: 16 * 1024 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Periodic sweep of stale connections.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaperSettings {
    /// Seconds between sweeps.
    pub interval_secs: u64,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            metrics: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_timeout_exceeds_interval() {
        let s = ServerSettings::default();
        assert!(s.heartbeat_timeout_secs >= 2 * s.heartbeat_interval_secs);
    }

    #[test]
    fn heartbeat_timeout_fits_reaper_interval() {
        let s = ServerSettings::default();
        assert!(s.heartbeat_timeout_secs <= ReaperSettings::default().interval_secs);
    }

    #[test]
    fn logging_defaults() {
        let l = LoggingSettings::default();
        assert_eq!(l.level, "info");
        assert!(!l.json);
        assert!(l.metrics);
    }
}
