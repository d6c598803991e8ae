//! Request handlers.

pub mod admin;
pub mod auth;
pub mod health;
pub mod logs;
pub mod users;
