//! Health checks. Unauthenticated and not rate limited.

use crate::db::check_health;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::time::Duration;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = check_health(state.store.as_ref(), STORE_CHECK_TIMEOUT).await;
    let status = if store.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if store.is_healthy { "ok" } else { "degraded" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.uptime_secs(),
            "store": store,
        })),
    )
}

/// `GET /health/readiness`
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let store = check_health(state.store.as_ref(), STORE_CHECK_TIMEOUT).await;
    let status = if store.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if store.is_healthy { "ready" } else { "not_ready" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "checks": { "store": if store.is_healthy { "ok" } else { "failed" } },
        })),
    )
}

/// `GET /health/liveness`
pub async fn liveness() -> impl IntoResponse {
    Json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
