//! Access-control error taxonomy.

use crate::store::StoreError;
use thiserror::Error;

/// Result type for token, session and credential checks.
pub type AuthResult<T> = Result<T, AuthError>;

/// Failures of the credential lifecycle.
///
/// Every variant is terminal for the request that produced it; none of
/// them is retried.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token is not a well-formed credential of the expected kind.
    #[error("malformed token")]
    MalformedToken,

    /// Signature does not verify, or the token names another algorithm.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Token is outside its validity window.
    #[error("token expired")]
    TokenExpired,

    /// Refresh token verified but its session row is gone or expired.
    #[error("refresh session revoked")]
    SessionRevoked,

    /// Identity exists but has been deactivated.
    #[error("identity is inactive")]
    IdentityInactive,

    /// Identity referenced by a token no longer exists.
    #[error("identity not found")]
    IdentityNotFound,

    /// Username/password pair rejected.
    #[error("invalid credentials")]
    CredentialsInvalid,

    /// Credential store could not be reached.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    /// Token could not be signed.
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// Password hash could not be produced or parsed.
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl AuthError {
    /// Error code for logs and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::SessionRevoked => "session_revoked",
            Self::IdentityInactive => "identity_inactive",
            Self::IdentityNotFound => "identity_not_found",
            Self::CredentialsInvalid => "credentials_invalid",
            Self::Store(_) => "store_error",
            Self::Signing(_) => "signing_error",
            Self::PasswordHash(_) => "password_hash_error",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::TokenExpired,
            _ => AuthError::MalformedToken,
        }
    }
}
