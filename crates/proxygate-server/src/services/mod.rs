//! Business logic layer.

pub mod auth;
pub mod password;
pub mod users;

pub use auth::AuthService;
pub use password::{check_password, hash_password, hash_password_blocking, verify_password};
pub use users::{CreateUser, EditUser, UserError, UserService};
