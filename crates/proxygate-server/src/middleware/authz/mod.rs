//! Role-based authorization.

pub mod layer;

pub use layer::{check_role, RequireRoleLayer, RequireRoleMiddleware};
