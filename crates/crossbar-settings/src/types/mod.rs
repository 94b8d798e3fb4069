//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs to name the fields it changes.

mod bridge;
mod server;

pub use bridge::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "groupAPort": 9000 },
///   "bridge": { "workerAddr": "10.0.0.4:8080" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrossbarSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// UDP side channel to the external worker.
    pub bridge: BridgeSettings,
    /// Stale connection sweep.
    pub reaper: ReaperSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for CrossbarSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "crossbar".to_string(),
            server: ServerSettings::default(),
            bridge: BridgeSettings::default(),
            reaper: ReaperSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl CrossbarSettings {
    /// Clamp values that would make the relay misbehave.
    ///
    /// The heartbeat window is tied to the reaper: the timeout is lowered to
    /// the reaper interval so a silent peer is pruned on the first sweep after
    /// it stops answering pings, and raised to at least twice the ping
    /// interval so a healthy peer always has one pong in flight. When the
    /// reaper interval is below two pings the ping interval shrinks to fit.
    ///
    /// Each correction is logged at `warn`. Returns the number of fields changed.
    pub fn validate(&mut self) -> usize {
        let server = &mut self.server;
        let reaper = &mut self.reaper.interval_secs;
        let bridge = &mut self.bridge;

        let mut fixed = 0;
        fixed += usize::from(raise("reaper.intervalSecs", reaper, 1));
        fixed += usize::from(raise("server.heartbeatIntervalSecs", &mut server.heartbeat_interval_secs, 1));
        fixed += usize::from(lower(
            "server.heartbeatIntervalSecs",
            &mut server.heartbeat_interval_secs,
            (*reaper / 2).max(1),
        ));
        fixed += usize::from(lower("server.heartbeatTimeoutSecs", &mut server.heartbeat_timeout_secs, *reaper));
        fixed += usize::from(raise(
            "server.heartbeatTimeoutSecs",
            &mut server.heartbeat_timeout_secs,
            server.heartbeat_interval_secs * 2,
        ));
        fixed += usize::from(raise("server.maxSendDrops", &mut server.max_send_drops, 1));
        fixed += usize::from(raise("bridge.sendTimeoutMs", &mut bridge.send_timeout_ms, 1));

        if server.send_queue_capacity == 0 {
            tracing::warn!(field = "server.sendQueueCapacity", "zero queue capacity, clamping to 1");
            server.send_queue_capacity = 1;
            fixed += 1;
        }
        if bridge.max_datagram_size == 0 {
            tracing::warn!(field = "bridge.maxDatagramSize", "zero datagram size, using default");
            bridge.max_datagram_size = BridgeSettings::default().max_datagram_size;
            fixed += 1;
        }
        fixed
    }
}

fn raise(name: &str, value: &mut u64, min: u64) -> bool {
    if *value >= min {
        return false;
    }
    tracing::warn!(field = name, value = *value, min, "settings value too small, clamping");
    *value = min;
    true
}

fn lower(name: &str, value: &mut u64, max: u64) -> bool {
    if *value <= max {
        return false;
    }
    tracing::warn!(field = name, value = *value, max, "settings value too large, clamping");
    *value = max;
    true
}
