//! Database connection management.

pub mod config;
pub mod connect;
pub mod health;

pub use config::DbConfig;
pub use connect::connect_store;
pub use health::{check_health, StoreHealth};
