//! Server configuration types.

use crate::db::DbConfig;
use proxygate_common_secret::SecretString;
use serde::{Deserialize, Serialize};
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

/// Main server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// CONNECT tunnel listener.
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Admin API listener.
    #[serde(default)]
    pub api: ApiConfig,
    /// Credential store.
    #[serde(default)]
    pub database: DbConfig,
    /// Token signing and horizons.
    #[serde(default)]
    pub auth: AuthConfig,
    /// API rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Request log persistence.
    #[serde(default)]
    pub audit: AuditConfig,
    /// First-run administrator.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Tunnel listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    /// Literal IPs and CIDR blocks admitted without credentials.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// Realm announced in `Proxy-Authenticate`.
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default)]
    pub basic_auth: BasicAuthConfig,
    /// Upstream dial timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_proxy_port() -> u16 {
    8181
}

fn default_api_port() -> u16 {
    default_proxy_port() + 1
}

fn default_realm() -> String {
    "proxygate".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            allowed_ips: Vec::new(),
            realm: default_realm(),
            basic_auth: BasicAuthConfig::default(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ProxyConfig {
    /// Listen address from `host` and `port`.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Upstream dial timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where tunnel basic-auth credentials are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasicAuthMode {
    /// A single configured username/password pair.
    #[default]
    Static,
    /// Active identities in the credential store.
    Store,
}

/// Tunnel basic-auth fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    #[serde(default)]
    pub mode: BasicAuthMode,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: SecretString,
}

/// Admin API listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Per-request deadline for the admin API.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret.
    #[serde(default)]
    pub jwt_secret: SecretString,
    /// Access credential horizon.
    #[serde(default = "default_access_hours")]
    pub access_token_hours: i64,
    /// Refresh credential and session horizon.
    #[serde(default = "default_refresh_hours")]
    pub refresh_token_hours: i64,
}

fn default_access_hours() -> i64 {
    24
}

fn default_refresh_hours() -> i64 {
    24 * 7
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::default(),
            access_token_hours: default_access_hours(),
            refresh_token_hours: default_refresh_hours(),
        }
    }
}

impl AuthConfig {
    /// Access token lifetime.
    pub fn access_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.access_token_hours)
    }

    /// Refresh token and session lifetime.
    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.refresh_token_hours)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests admitted per key per window.
    #[serde(default = "default_rate_limit")]
    pub requests_per_window: u32,
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
    /// Period of the idle-key sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Reverse proxies (IPs or CIDR blocks) whose `X-Forwarded-For` and
    /// `X-Real-IP` headers name the client. Empty means key on the peer.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_rate_limit() -> u32 {
    100
}

fn default_rate_window() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: default_rate_limit(),
            window_secs: default_rate_window(),
            sweep_interval_secs: default_sweep_interval(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Period between idle-key sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty`, `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Request log persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Records buffered before new ones are dropped.
    #[serde(default = "default_audit_buffer")]
    pub buffer_size: usize,
    /// Records written per store call.
    #[serde(default = "default_audit_batch")]
    pub batch_size: usize,
    #[serde(default = "default_audit_flush")]
    pub flush_interval_ms: u64,
}

fn default_audit_buffer() -> usize {
    10_000
}

fn default_audit_batch() -> usize {
    100
}

fn default_audit_flush() -> u64 {
    1000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: default_audit_buffer(),
            batch_size: default_audit_batch(),
            flush_interval_ms: default_audit_flush(),
        }
    }
}

impl AuditConfig {
    /// Longest a partial batch waits before being written.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Administrator created when the store holds none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: SecretString,
    #[serde(default)]
    pub admin_email: Option<String>,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_password() -> SecretString {
    SecretString::from("admin")
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            admin_password: default_admin_password(),
            admin_email: None,
        }
    }
}
