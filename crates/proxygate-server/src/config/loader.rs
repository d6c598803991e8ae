//! Configuration loading utilities.

use super::types::ServerConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "PROXYGATE_CONFIG";

/// Config file read when `PROXYGATE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Load configuration from various sources.
///
/// Later sources win: embedded defaults, then the config file, then
/// `PROXYGATE__SECTION__KEY` environment variables.
pub struct ConfigLoader {
    config_path: Option<String>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Loader reading the embedded defaults, then the file, then the environment.
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: "PROXYGATE".to_string(),
        }
    }

    /// Set config file path.
    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration.
    pub fn load(&self) -> Result<ServerConfig> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::File::from_str(
            include_str!("defaults.toml"),
            config::FileFormat::Toml,
        ));

        // A missing file means defaults plus environment
        if let Some(path) = &self.config_path {
            if Path::new(path).exists() {
                info!(path = %path, "Loading config file");
                builder = builder.add_source(config::File::with_name(path));
            } else {
                debug!(path = %path, "Config file not found, using defaults");
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("proxy.allowed_ips")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration from the path in `PROXYGATE_CONFIG` (or `config.yaml`).
pub fn load_config() -> Result<ServerConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    ConfigLoader::new().with_config_path(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasicAuthMode;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = ConfigLoader::new()
            .with_env_prefix("PGTEST_DEFAULTS")
            .with_config_path("/nonexistent/proxygate.yaml")
            .load()
            .unwrap();

        assert_eq!(config.proxy.port, 8181);
        assert_eq!(config.api.port, 8182);
        assert_eq!(config.auth.access_token_hours, 24);
        assert_eq!(config.auth.refresh_token_hours, 168);
        assert_eq!(config.rate_limit.requests_per_window, 100);
        assert_eq!(config.proxy.basic_auth.mode, BasicAuthMode::Static);
        assert!(config.database.url.starts_with("memory"));
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "proxy:\n  port: 9000\n  allowed_ips:\n    - 10.0.0.0/8\n  basic_auth:\n    mode: store\nauth:\n  access_token_hours: 2"
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_env_prefix("PGTEST_YAML")
            .with_config_path(file.path().to_string_lossy())
            .load()
            .unwrap();

        assert_eq!(config.proxy.port, 9000);
        assert_eq!(config.proxy.allowed_ips, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(config.proxy.basic_auth.mode, BasicAuthMode::Store);
        assert_eq!(config.auth.access_token_hours, 2);
        assert_eq!(config.auth.refresh_token_hours, 168);
    }

    #[test]
    fn test_env_overrides_file() {
        std::env::set_var("PGTEST_ENV__RATE_LIMIT__REQUESTS_PER_WINDOW", "5");
        std::env::set_var("PGTEST_ENV__PROXY__ALLOWED_IPS", "192.168.1.0/24,10.1.2.3");

        let config = ConfigLoader::new()
            .with_env_prefix("PGTEST_ENV")
            .load()
            .unwrap();

        assert_eq!(config.rate_limit.requests_per_window, 5);
        assert_eq!(
            config.proxy.allowed_ips,
            vec!["192.168.1.0/24".to_string(), "10.1.2.3".to_string()]
        );

        std::env::remove_var("PGTEST_ENV__RATE_LIMIT__REQUESTS_PER_WINDOW");
        std::env::remove_var("PGTEST_ENV__PROXY__ALLOWED_IPS");
    }
}
