//! Non-blocking capture of request log records.

use crate::store::RequestLog;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handle for submitting request logs to the background writer.
///
/// Cloned into every listener. A disabled sink discards records.
#[derive(Clone, Debug)]
pub struct AuditSink {
    sender: Option<mpsc::Sender<RequestLog>>,
}

impl AuditSink {
    /// Create a sink with a bounded buffer and the receiving end for the writer.
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<RequestLog>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Whether records are forwarded at all.
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue a record without waiting. Drops it when the buffer is full.
    pub fn record(&self, log: RequestLog) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(log) {
            Ok(()) => debug!("Request log queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Audit buffer full, request log dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Audit writer stopped, request log dropped");
            }
        }
    }

    /// Check if the writer is still receiving.
    pub fn is_healthy(&self) -> bool {
        self.sender.as_ref().map_or(true, |s| !s.is_closed())
    }

    /// Approximate buffer usage in `[0, 1]`.
    pub fn buffer_usage(&self) -> f64 {
        match &self.sender {
            Some(sender) => 1.0 - (sender.capacity() as f64 / sender.max_capacity() as f64),
            None => 0.0,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_log(url: &str) -> RequestLog {
    RequestLog {
        user_id: None,
        remote_addr: "127.0.0.1".into(),
        method: "GET".into(),
        url: url.into(),
        host: "localhost".into(),
        user_agent: "test".into(),
        status_code: 200,
        response_size: 0,
        duration_ms: 1,
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_reach_receiver() {
        let (sink, mut rx) = AuditSink::new(4);
        sink.record(sample_log("/a"));
        assert_eq!(rx.recv().await.unwrap().url, "/a");
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let (sink, mut rx) = AuditSink::new(1);
        sink.record(sample_log("/kept"));
        sink.record(sample_log("/dropped"));
        assert_eq!(sink.buffer_usage(), 1.0);

        assert_eq!(rx.recv().await.unwrap().url, "/kept");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_sink() {
        let sink = AuditSink::disabled();
        sink.record(sample_log("/ignored"));
        assert!(!sink.is_enabled());
        assert!(sink.is_healthy());
    }

    #[test]
    fn test_closed_writer_is_unhealthy() {
        let (sink, rx) = AuditSink::new(1);
        drop(rx);
        assert!(!sink.is_healthy());
        sink.record(sample_log("/late"));
    }
}
