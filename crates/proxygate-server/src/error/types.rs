//! API error types.

use super::auth::AuthError;
use crate::services::UserError;
use crate::store::StoreError;
use axum::http::StatusCode;
use thiserror::Error;
use tracing::warn;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// API error enum covering all error cases.
#[derive(Debug, Error)]
pub enum ApiError {
    // 400 Bad Request
    #[error("Bad request: {0}")]
    BadRequest(String),

    // 401 Unauthorized
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Refresh session revoked")]
    SessionRevoked,

    #[error("User account is inactive")]
    AccountInactive,

    // 403 Forbidden
    #[error("Forbidden")]
    Forbidden,

    // 404 Not Found
    #[error("{0} not found")]
    NotFound(String),

    // 409 Conflict
    #[error("{0} already exists")]
    Conflict(String),

    // 429 Too Many Requests
    #[error("Rate limit exceeded")]
    RateLimited {
        retry_after: u64,
    },

    // 500 Internal Server Error
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),

    #[error("Store error")]
    Store(#[source] StoreError),

    // 503 Service Unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,

            Self::Unauthorized
            | Self::InvalidCredentials
            | Self::TokenExpired
            | Self::InvalidToken
            | Self::SessionRevoked
            | Self::AccountInactive => StatusCode::UNAUTHORIZED,

            Self::Forbidden => StatusCode::FORBIDDEN,

            Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::Conflict(_) => StatusCode::CONFLICT,

            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            Self::Internal(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get error code for client handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::InvalidCredentials => "invalid_credentials",
            Self::TokenExpired => "token_expired",
            Self::InvalidToken => "invalid_token",
            Self::SessionRevoked => "session_revoked",
            Self::AccountInactive => "account_inactive",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal(_) => "internal_error",
            Self::Store(_) => "store_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    /// Check if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this is an authentication or authorization failure.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self.status_code(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        )
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MalformedToken | AuthError::InvalidSignature => ApiError::InvalidToken,
            AuthError::TokenExpired => ApiError::TokenExpired,
            AuthError::SessionRevoked => ApiError::SessionRevoked,
            AuthError::IdentityInactive => ApiError::AccountInactive,
            AuthError::IdentityNotFound => ApiError::Unauthorized,
            AuthError::CredentialsInvalid => ApiError::InvalidCredentials,
            AuthError::Store(store_err) => {
                // Store availability is not disclosed to unauthenticated callers.
                warn!(error = %store_err, "Credential store failure during authentication");
                ApiError::Unauthorized
            }
            err @ (AuthError::Signing(_) | AuthError::PasswordHash(_)) => {
                ApiError::Internal(anyhow::Error::new(err))
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound => ApiError::NotFound("User".to_string()),
            UserError::Conflict(what) => ApiError::Conflict(what),
            err @ (UserError::Invalid(_) | UserError::LastAdmin | UserError::IncorrectPassword) => {
                ApiError::BadRequest(err.to_string())
            }
            UserError::Store(err) => ApiError::Store(err),
            UserError::Password(err) => ApiError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}
