//! Shutdown coordination.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Shared stop flag for the listeners, the limiter sweep and the audit writer.
///
/// Every clone observes the same state. Once initiated, shutdown cannot be
/// undone.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    stopping: Arc<watch::Sender<bool>>,
    finished: Arc<watch::Sender<bool>>,
    /// Grace period for background tasks to drain.
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator granting `timeout` for the drain.
    pub fn new(timeout: Duration) -> Self {
        Self {
            stopping: Arc::new(watch::channel(false).0),
            finished: Arc::new(watch::channel(false).0),
            timeout,
        }
    }

    /// Resolve once shutdown has been initiated, including before this call.
    pub async fn cancelled(&self) {
        let mut rx = self.stopping.subscribe();
        let _ = rx.wait_for(|&stopping| stopping).await;
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Start shutdown. Repeated calls are no-ops.
    pub fn initiate(&self) {
        let first = self.stopping.send_if_modified(|stopping| !std::mem::replace(stopping, true));
        if first {
            info!("Initiating graceful shutdown");
        }
    }

    /// Resolve once [`complete`](Self::complete) has been called.
    pub async fn wait_for_completion(&self) {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|&done| done).await;
    }

    /// Mark the drain as finished.
    pub fn complete(&self) {
        info!("Shutdown complete");
        self.finished.send_replace(true);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_late_waiter_still_sees_shutdown() {
        let coordinator = ShutdownCoordinator::default();
        coordinator.initiate();

        tokio::time::timeout(Duration::from_secs(1), coordinator.cancelled())
            .await
            .expect("cancelled() should resolve after initiate()");
    }

    #[tokio::test]
    async fn test_waiting_task_is_released() {
        let coordinator = ShutdownCoordinator::default();
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.cancelled().await })
        };

        tokio::task::yield_now().await;
        assert!(!coordinator.is_shutting_down());
        coordinator.initiate();
        coordinator.initiate();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_completion_notifies() {
        let coordinator = ShutdownCoordinator::default();
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_completion().await })
        };

        coordinator.complete();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
