//! Metric names and the `/metrics` renderer.

use metrics_exporter_prometheus::PrometheusHandle;

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections opened (counter, labels: group).
pub const RELAY_CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections closed (counter, labels: group).
pub const RELAY_DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Registered connections (gauge, labels: group).
pub const RELAY_CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Frames enqueued to a recipient (counter, labels: group).
pub const RELAY_FRAMES_DELIVERED_TOTAL: &str = "relay_frames_delivered_total";
/// Frames dropped on a full queue (counter, labels: group).
pub const RELAY_FANOUT_DROPS_TOTAL: &str = "relay_fanout_drops_total";
/// Slow consumers disconnected by fan-out (counter, labels: group).
pub const RELAY_SLOW_CONSUMERS_TOTAL: &str = "relay_slow_consumers_total";
/// Bridge requests sent (counter, labels: outcome).
pub const BRIDGE_DISPATCH_TOTAL: &str = "bridge_dispatch_total";
/// Worker datagrams received (counter, labels: outcome).
pub const BRIDGE_RESPONSES_TOTAL: &str = "bridge_responses_total";
/// Connections removed by the reaper (counter, labels: group).
pub const REAPER_PRUNED_TOTAL: &str = "reaper_pruned_total";
