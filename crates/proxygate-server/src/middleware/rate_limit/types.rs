//! Rate limiting types.

use crate::error::ApiError;
use std::time::Duration;

/// Window parameters for the limiter.
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    /// Maximum requests admitted per key within one window.
    pub max_requests: u32,
    /// Trailing window width.
    pub window: Duration,
}

impl WindowConfig {
    /// Admit `max_requests` per sliding `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl From<&crate::config::RateLimitConfig> for WindowConfig {
    fn from(config: &crate::config::RateLimitConfig) -> Self {
        Self::new(config.requests_per_window, config.window())
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// Time until the oldest counted request leaves the window. Set on denial.
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    /// Turn a denial into the error surfaced to the caller.
    pub fn into_result(self) -> Result<Self, RateLimitExceeded> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitExceeded {
                retry_after: self.retry_after.unwrap_or(Duration::from_secs(1)),
            })
        }
    }
}

/// A denied admission. Expected under load, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

impl From<RateLimitExceeded> for ApiError {
    fn from(err: RateLimitExceeded) -> Self {
        // Round up so clients never retry inside the window.
        let secs = err.retry_after.as_secs() + u64::from(err.retry_after.subsec_nanos() > 0);
        ApiError::RateLimited {
            retry_after: secs.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_becomes_error() {
        let result = RateLimitResult {
            allowed: false,
            limit: 1,
            remaining: 0,
            retry_after: Some(Duration::from_millis(1500)),
        };
        let err = result.into_result().unwrap_err();
        assert!(matches!(
            ApiError::from(err),
            ApiError::RateLimited { retry_after: 2 }
        ));
    }

    #[test]
    fn test_allowed_passes_through() {
        let result = RateLimitResult {
            allowed: true,
            limit: 5,
            remaining: 4,
            retry_after: None,
        };
        assert_eq!(result.into_result().unwrap().remaining, 4);
    }
}
