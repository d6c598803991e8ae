//! Login, refresh, logout and identity endpoints.

use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{AccessToken, Auth, TokenPair};
use crate::response::ApiResponse;
use crate::state::AppState;
use crate::store::Role;
use axum::{extract::State, Json};
use proxygate_common_secret::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Identity behind the presented access token.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: i64,
    pub username: String,
    pub role: Role,
    /// Access token expiry, unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<ApiResponse<TokenPair>> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password are required".to_string(),
        ));
    }

    let pair = state
        .auth
        .login(req.username.trim(), req.password.expose())
        .await?;
    Ok(ApiResponse::success(pair))
}

/// `POST /api/auth/refresh`
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<ApiResponse<AccessToken>> {
    if req.refresh_token.is_empty() {
        return Err(ApiError::BadRequest("refresh_token is required".to_string()));
    }

    let token = state.auth.refresh(&req.refresh_token).await?;
    Ok(ApiResponse::success(token))
}

/// `POST /api/auth/logout`
pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<ApiResponse<LogoutResponse>> {
    state.auth.logout(&req.refresh_token).await?;
    Ok(ApiResponse::success(LogoutResponse {
        message: "logged out",
    }))
}

/// `GET /api/auth/me`
pub async fn me(Auth(user): Auth) -> ApiResponse<MeResponse> {
    ApiResponse::success(MeResponse {
        id: user.id,
        username: user.username,
        role: user.role,
        expires_at: user.claims.exp,
    })
}
