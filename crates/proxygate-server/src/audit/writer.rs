//! Background writer persisting request logs in batches.

use crate::shutdown::ShutdownCoordinator;
use crate::store::{CredentialStore, RequestLog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shortest flush period; `tokio::time::interval` rejects zero.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Drains the audit channel into the credential store.
pub struct AuditWriter {
    store: Arc<dyn CredentialStore>,
    receiver: mpsc::Receiver<RequestLog>,
    batch_size: usize,
    flush_interval: Duration,
}

impl AuditWriter {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        receiver: mpsc::Receiver<RequestLog>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            receiver,
            batch_size: batch_size.max(1),
            flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
        }
    }

    /// Run until the sink closes or shutdown, then flush what is buffered.
    pub fn spawn(self, shutdown: ShutdownCoordinator) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Write batches until every sender is gone or shutdown starts.
    ///
    /// On shutdown the channel is closed and whatever is buffered is flushed.
    pub async fn run(mut self, shutdown: ShutdownCoordinator) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(log) => {
                        batch.push(log);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => {
                        self.flush(&mut batch).await;
                        debug!("Audit channel closed");
                        return;
                    }
                },
                _ = ticker.tick() => self.flush(&mut batch).await,
                _ = shutdown.cancelled() => break,
            }
        }

        self.receiver.close();
        while let Some(log) = self.receiver.recv().await {
            batch.push(log);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch).await;
            }
        }
        self.flush(&mut batch).await;
        info!("Audit writer drained");
    }

    /// Write and clear the batch. A failed write is logged and dropped.
    async fn flush(&self, batch: &mut Vec<RequestLog>) {
        if batch.is_empty() {
            return;
        }

        match self.store.insert_request_logs(batch).await {
            Ok(()) => debug!(count = batch.len(), "Request logs written"),
            Err(e) => warn!(count = batch.len(), error = %e, "Failed to write request logs"),
        }
        batch.clear();
    }
}
