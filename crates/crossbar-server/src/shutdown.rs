//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time to wait for tasks before aborting them.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the server-wide cancellation token.
///
/// Listeners, the bridge listener and the reaper watch the token directly;
/// each connection watches a child token so it can also be closed alone.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the server but cancellable on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything and wait up to `timeout` for `handles` to finish.
    ///
    /// Tasks still running at the deadline are aborted. Returns `true` if
    /// every task finished in time.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_children() {
        let coord = ShutdownCoordinator::new();
        let child = coord.child_token();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_propagate_up() {
        let coord = ShutdownCoordinator::new();
        let child = coord.child_token();
        child.cancel();
        assert!(!coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        assert!(coord.graceful_shutdown(vec![handle], Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn graceful_shutdown_aborts_stuck_tasks() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!coord.graceful_shutdown(vec![handle], Duration::from_millis(50)).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_with_no_tasks() {
        let coord = ShutdownCoordinator::new();
        assert!(coord.graceful_shutdown(Vec::new(), Duration::from_millis(10)).await);
    }
}
