//! Configuration validation.

use super::types::{BasicAuthMode, ServerConfig};
use proxygate_common_log::LogLevel;
use thiserror::Error;

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Configuration violation reported by [`validate_config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid JWT secret: must be at least 32 bytes")]
    InvalidJwtSecret,

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid {listener} port: {port}")]
    InvalidPort { listener: &'static str, port: u16 },

    #[error("Invalid {listener} address: {reason}")]
    InvalidAddress {
        listener: &'static str,
        reason: String,
    },

    #[error("Proxy and API listeners share address {0}")]
    AddressConflict(String),

    #[error("Invalid token horizon: {0}")]
    InvalidTokenHorizon(String),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),

    #[error("Invalid audit configuration: {0}")]
    InvalidAudit(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Static basic auth requires a username")]
    MissingBasicAuthUsername,

    #[error("Static basic auth requires a password")]
    MissingBasicAuthPassword,

    /// A timeout or period that must be non-zero.
    #[error("Invalid duration {field}: must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// Allow-list entry that is neither an IP nor a CIDR block.
    #[error("Invalid access rule '{entry}': {reason}")]
    InvalidAccessRule { entry: String, reason: String },
}

/// Validate server configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.auth.jwt_secret.len() < MIN_SECRET_LEN {
        errors.push(ConfigError::InvalidJwtSecret);
    }

    if config.database.url.trim().is_empty() {
        errors.push(ConfigError::InvalidDatabaseUrl);
    }

    if config.proxy.port == 0 {
        errors.push(ConfigError::InvalidPort {
            listener: "proxy",
            port: 0,
        });
    }
    if config.api.port == 0 {
        errors.push(ConfigError::InvalidPort {
            listener: "api",
            port: 0,
        });
    }

    match (config.proxy.socket_addr(), config.api.socket_addr()) {
        (Ok(proxy), Ok(api)) => {
            if proxy == api && proxy.port() != 0 {
                errors.push(ConfigError::AddressConflict(proxy.to_string()));
            }
        }
        (proxy, api) => {
            if let Err(e) = proxy {
                errors.push(ConfigError::InvalidAddress {
                    listener: "proxy",
                    reason: e.to_string(),
                });
            }
            if let Err(e) = api {
                errors.push(ConfigError::InvalidAddress {
                    listener: "api",
                    reason: e.to_string(),
                });
            }
        }
    }

    let auth = &config.auth;
    if auth.access_token_hours <= 0 {
        errors.push(ConfigError::InvalidTokenHorizon(format!(
            "access_token_hours must be positive, got {}",
            auth.access_token_hours
        )));
    }
    if auth.refresh_token_hours <= 0 {
        errors.push(ConfigError::InvalidTokenHorizon(format!(
            "refresh_token_hours must be positive, got {}",
            auth.refresh_token_hours
        )));
    }
    if auth.refresh_token_hours < auth.access_token_hours {
        errors.push(ConfigError::InvalidTokenHorizon(
            "refresh_token_hours must not be shorter than access_token_hours".to_string(),
        ));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.enabled {
        if rate_limit.requests_per_window == 0 {
            errors.push(ConfigError::InvalidRateLimit(
                "requests_per_window must be at least 1".to_string(),
            ));
        }
        if rate_limit.window_secs == 0 {
            errors.push(ConfigError::InvalidRateLimit(
                "window_secs must be at least 1".to_string(),
            ));
        }
        if rate_limit.sweep_interval_secs == 0 {
            errors.push(ConfigError::InvalidRateLimit(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
    }

    let audit = &config.audit;
    if audit.enabled && (audit.buffer_size == 0 || audit.batch_size == 0) {
        errors.push(ConfigError::InvalidAudit(
            "buffer_size and batch_size must be at least 1".to_string(),
        ));
    }

    let durations = [
        ("audit.flush_interval_ms", audit.enabled, audit.flush_interval_ms),
        ("api.request_timeout_secs", true, config.api.request_timeout_secs),
        ("proxy.connect_timeout_secs", true, config.proxy.connect_timeout_secs),
    ];
    for (field, applies, value) in durations {
        if applies && value == 0 {
            errors.push(ConfigError::ZeroDuration { field });
        }
    }

    if LogLevel::parse(&config.logging.level).is_none() {
        errors.push(ConfigError::InvalidLogLevel(config.logging.level.clone()));
    }

    let basic_auth = &config.proxy.basic_auth;
    if basic_auth.mode == BasicAuthMode::Static {
        if basic_auth.username.trim().is_empty() {
            errors.push(ConfigError::MissingBasicAuthUsername);
        }
        if basic_auth.password.is_empty() {
            errors.push(ConfigError::MissingBasicAuthPassword);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
