//! Error handling for the proxygate server.

pub mod auth;
pub mod response;
pub mod types;

pub use auth::{AuthError, AuthResult};
pub use types::{ApiError, ApiResult};
