//! Middleware for the admin API.

pub mod auth;
pub mod authz;
pub mod logging;
pub mod rate_limit;

pub use auth::{AdminAuth, Auth, AuthLayer, AuthMiddleware, AuthUser};
pub use authz::{RequireRoleLayer, RequireRoleMiddleware};
pub use logging::RequestLogLayer;
pub use rate_limit::{RateLimitLayer, SlidingWindowLimiter};
