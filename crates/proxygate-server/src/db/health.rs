//! Store health monitoring.

use crate::store::CredentialStore;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Store health status.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub is_healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Ping the credential store, bounded by `timeout`.
pub async fn check_health(store: &dyn CredentialStore, timeout: Duration) -> StoreHealth {
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, store.ping()).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(())) => {
            debug!(latency_ms, "Store health check passed");
            StoreHealth {
                is_healthy: true,
                latency_ms,
                message: None,
            }
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Store health check failed");
            StoreHealth {
                is_healthy: false,
                latency_ms,
                message: Some(e.to_string()),
            }
        }
        Err(_) => {
            warn!("Store health check timed out");
            StoreHealth {
                is_healthy: false,
                latency_ms,
                message: Some("Connection timeout".to_string()),
            }
        }
    }
}
