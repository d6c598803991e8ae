//! Administrative endpoints. Mounted behind the admin role gate.

use crate::db::{check_health, StoreHealth};
use crate::error::ApiResult;
use crate::middleware::auth::AdminAuth;
use crate::response::ApiResponse;
use crate::state::AppState;
use axum::extract::State;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Runtime overview for operators.
#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub store: StoreHealth,
    pub rate_limit: RateLimitInfo,
    pub audit: AuditInfo,
}

#[derive(Debug, Serialize)]
pub struct RateLimitInfo {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub tracked_keys: usize,
}

#[derive(Debug, Serialize)]
pub struct AuditInfo {
    pub enabled: bool,
    pub healthy: bool,
    pub buffer_usage: f64,
}

#[derive(Debug, Serialize)]
pub struct PurgeResult {
    pub removed: u64,
}

/// `GET /api/admin/system`
pub async fn system(State(state): State<AppState>) -> ApiResponse<SystemInfo> {
    let store = check_health(state.store.as_ref(), Duration::from_secs(2)).await;
    let limits = &state.config.rate_limit;

    ApiResponse::success(SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        store,
        rate_limit: RateLimitInfo {
            enabled: limits.enabled,
            requests_per_window: limits.requests_per_window,
            window_secs: limits.window_secs,
            tracked_keys: state.limiter.tracked_keys(),
        },
        audit: AuditInfo {
            enabled: state.audit.is_enabled(),
            healthy: state.audit.is_healthy(),
            buffer_usage: state.audit.buffer_usage(),
        },
    })
}

/// `DELETE /api/admin/sessions/expired`
pub async fn purge_expired_sessions(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
) -> ApiResult<ApiResponse<PurgeResult>> {
    let removed = state.auth.purge_expired_sessions().await?;
    info!(admin_id = admin.id, removed, "Expired sessions purged");
    Ok(ApiResponse::success(PurgeResult { removed }))
}
