//! Account administration endpoints. Mounted behind the admin role gate,
//! except for `change_password`, which any authenticated caller may use.

use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{AdminAuth, Auth};
use crate::response::ApiResponse;
use crate::services::{CreateUser, EditUser};
use crate::state::AppState;
use crate::store::{Page, PageRequest, Role, User, UserQuery};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use proxygate_common_secret::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

const DEFAULT_PAGE_SIZE: i64 = 20;

/// Query string of `GET /api/admin/users`.
#[derive(Debug, Deserialize)]
pub struct ListUsersParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Substring of the username or email.
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: SecretString,
    pub email: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

/// Fields left out are unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: SecretString,
    pub new_password: SecretString,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct PasswordChanged {
    pub message: &'static str,
}

/// `GET /api/admin/users`
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<ListUsersParams>,
) -> ApiResult<ApiResponse<Page<User>>> {
    let query = UserQuery {
        search: params.search.filter(|s| !s.trim().is_empty()),
        page: PageRequest::new(
            params.page.unwrap_or(1),
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        ),
    };
    Ok(ApiResponse::success(state.users.list(&query).await?))
}

/// `GET /api/admin/users/:id`
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<User>> {
    Ok(ApiResponse::success(state.users.get(id).await?))
}

/// `POST /api/admin/users`
pub async fn create_user(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<ApiResponse<User>> {
    let user = state
        .users
        .create(CreateUser {
            username: req.username,
            password: req.password,
            email: req.email,
            role: req.role,
        })
        .await?;

    info!(admin_id = admin.id, user_id = user.id, "Account created by admin");
    Ok(ApiResponse::success(user).with_status(StatusCode::CREATED))
}

/// `PUT /api/admin/users/:id`
pub async fn update_user(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<ApiResponse<User>> {
    let user = state
        .users
        .update(
            id,
            EditUser {
                username: req.username,
                email: req.email,
                role: req.role,
                is_active: req.is_active,
            },
        )
        .await?;

    info!(admin_id = admin.id, user_id = id, "Account updated by admin");
    Ok(ApiResponse::success(user))
}

/// `DELETE /api/admin/users/:id`
pub async fn delete_user(
    AdminAuth(admin): AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<Deleted>> {
    if admin.id == id {
        return Err(ApiError::BadRequest(
            "cannot delete your own account".to_string(),
        ));
    }

    state.users.delete(id).await?;
    info!(admin_id = admin.id, user_id = id, "Account deleted by admin");
    Ok(ApiResponse::success(Deleted { id }))
}

/// `POST /api/auth/change-password`
pub async fn change_password(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<PasswordChanged>> {
    if req.current_password.is_empty() {
        return Err(ApiError::BadRequest(
            "current_password is required".to_string(),
        ));
    }

    state
        .users
        .change_password(user.id, req.current_password, req.new_password)
        .await?;
    Ok(ApiResponse::success(PasswordChanged {
        message: "password changed",
    }))
}
