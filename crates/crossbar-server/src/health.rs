//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::relay::registry::ConnectionRegistry;
use crate::websocket::connection::Group;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// The group served by the listener that answered.
    pub group: Group,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered group A connections.
    pub group_a: usize,
    /// Registered group B connections.
    pub group_b: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    group: Group,
    registry: &ConnectionRegistry,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        group,
        uptime_secs: start_time.elapsed().as_secs(),
        group_a: registry.len(Group::A),
        group_b: registry.len(Group::B),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::websocket::connection::tests::make_open;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), Group::A, &ConnectionRegistry::new());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        let resp = health_check(start, Group::A, &ConnectionRegistry::new());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counts_both_groups() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = make_open(Group::A, 1);
        let (b1, _rx_b1) = make_open(Group::B, 1);
        let (b2, _rx_b2) = make_open(Group::B, 1);
        let _ = registry.add(Arc::new(a));
        let _ = registry.add(Arc::new(b1));
        let _ = registry.add(Arc::new(b2));

        let resp = health_check(Instant::now(), Group::B, &registry);
        assert_eq!(resp.group_a, 1);
        assert_eq!(resp.group_b, 2);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), Group::B, &ConnectionRegistry::new());
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["group"], "b");
        assert!(parsed["uptime_secs"].is_number());
        assert_eq!(parsed["group_a"], 0);
    }
}
