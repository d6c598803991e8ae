//! Sliding-window rate limiting.

pub mod layer;
pub mod store;
pub mod types;

pub use layer::{client_ip, rate_limit_key, RateLimitLayer};
pub use store::SlidingWindowLimiter;
pub use types::{RateLimitExceeded, RateLimitResult, WindowConfig};
