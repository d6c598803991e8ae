//! Error response implementation.

use super::types::ApiError;
use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            error!(
                error = %self,
                code = self.error_code(),
                "Server error occurred"
            );
        } else if self.is_auth_error() {
            warn!(
                error = %self,
                code = self.error_code(),
                "Auth error occurred"
            );
        }

        let status = self.status_code();
        let code = self.error_code();

        let (message, retry_after) = match &self {
            ApiError::RateLimited { retry_after } => (self.to_string(), Some(*retry_after)),
            ApiError::Internal(err) => {
                // Internal details only leak in debug builds
                let message = if cfg!(debug_assertions) {
                    format!("{}: {}", self, err)
                } else {
                    "An internal error occurred".to_string()
                };
                (message, None)
            }
            _ => (self.to_string(), None),
        };

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code,
                message,
                retry_after,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }

        response
    }
}
