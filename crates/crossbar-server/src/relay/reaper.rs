//! Periodic removal of connections that died without a clean close.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::ConnectionRegistry;
use crate::metrics::REAPER_PRUNED_TOTAL;
use crate::websocket::connection::Group;

/// Connections removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Removed from group A.
    pub group_a: usize,
    /// Removed from group B.
    pub group_b: usize,
}

impl ReapReport {
    /// Removed across both groups.
    pub fn total(&self) -> usize {
        self.group_a + self.group_b
    }
}

/// Prune both groups once.
pub fn reap_once(registry: &ConnectionRegistry) -> ReapReport {
    let report = ReapReport {
        group_a: registry.prune_closed(Group::A),
        group_b: registry.prune_closed(Group::B),
    };
    for (group, removed) in [(Group::A, report.group_a), (Group::B, report.group_b)] {
        if removed > 0 {
            counter!(REAPER_PRUNED_TOTAL, "group" => group.as_str()).increment(removed as u64);
        }
    }
    report
}

/// Spawn the sweep task. The first sweep runs one `interval` after start.
pub fn spawn_reaper(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(?interval, "reaper started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = reap_once(&registry);
                    if report.total() > 0 {
                        info!(
                            group_a = report.group_a,
                            group_b = report.group_b,
                            remaining = registry.total(),
                            "reaped stale connections"
                        );
                    }
                }
            }
        }
        debug!("reaper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_open;

    #[test]
    fn reap_once_prunes_both_groups() {
        let reg = ConnectionRegistry::new();
        let (a_dead, a_rx) = make_open(Group::A, 4);
        let (b_dead, b_rx) = make_open(Group::B, 4);
        let (b_live, _b_live_rx) = make_open(Group::B, 4);
        drop(a_rx);
        drop(b_rx);
        let _ = reg.add(Arc::new(a_dead));
        let _ = reg.add(Arc::new(b_dead));
        let _ = reg.add(Arc::new(b_live));

        let report = reap_once(&reg);
        assert_eq!(report, ReapReport { group_a: 1, group_b: 1 });
        assert_eq!(reg.total(), 1);
    }

    #[test]
    fn reap_on_healthy_registry_removes_nothing() {
        let reg = ConnectionRegistry::new();
        let (a, _rx) = make_open(Group::A, 4);
        let _ = reg.add(Arc::new(a));
        assert_eq!(reap_once(&reg).total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_prunes_within_one_interval() {
        let reg = Arc::new(ConnectionRegistry::new());
        let (conn, rx) = make_open(Group::B, 4);
        let _ = reg.add(Arc::new(conn));
        drop(rx);

        let cancel = CancellationToken::new();
        let handle = spawn_reaper(Arc::clone(&reg), Duration::from_secs(30), cancel.clone());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(reg.len(Group::B), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(reg.len(Group::B), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reaper_stops_on_cancel() {
        let reg = Arc::new(ConnectionRegistry::new());
        let cancel = CancellationToken::new();
        let handle = spawn_reaper(reg, Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
