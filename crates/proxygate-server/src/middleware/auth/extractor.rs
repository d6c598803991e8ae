//! Authentication extractors for handlers.

use super::types::AuthUser;
use crate::error::ApiError;
use crate::middleware::authz::check_role;
use crate::store::Role;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Extractor for authenticated user (required).
pub struct Auth(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(Auth)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Extractor that requires admin role.
pub struct AdminAuth(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<AuthUser>();
        check_role(user, Role::Admin)?;
        user.cloned().map(AdminAuth).ok_or(ApiError::Forbidden)
    }
}
