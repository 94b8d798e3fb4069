//! Shared handles passed to every connection task.

use std::sync::Arc;
use std::time::Duration;

use crossbar_settings::ServerSettings;

use crate::bridge::BridgeDispatcher;
use crate::relay::classify::MessageClassifier;
use crate::relay::fanout::BroadcastFanout;
use crate::relay::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Per-connection limits.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Outbound queue length.
    pub send_queue_capacity: usize,
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is no longer live.
    pub heartbeat_timeout: Duration,
}

impl SessionConfig {
    /// Limits from the server settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            send_queue_capacity: settings.send_queue_capacity.max(1),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(settings.heartbeat_timeout_secs.max(1)),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

/// Everything a connection needs to relay and bridge its messages.
pub struct RelayContext {
    /// Group membership.
    pub registry: Arc<ConnectionRegistry>,
    /// Delivery to group members.
    pub fanout: Arc<BroadcastFanout>,
    /// Routing decision per frame.
    pub classifier: MessageClassifier,
    /// Worker-bound datagrams.
    pub dispatcher: Arc<BridgeDispatcher>,
    /// Server-wide cancellation.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Per-connection limits.
    pub session: SessionConfig,
}
