//! Proxygate server binary.

use anyhow::Result;
use proxygate_common_log::LogConfig;
use proxygate_server::{config, services::password, Server};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;

    let log_config = LogConfig::from_env()
        .with_level_and_format(&config.logging.level, &config.logging.format);
    proxygate_common_log::init(log_config)?;

    if let Err(errors) = config::validate_config(&config) {
        for err in &errors {
            error!(error = %err, "Invalid configuration");
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        proxy_port = config.proxy.port,
        api_port = config.api.port,
        "Starting proxygate"
    );

    let bootstrap = config.bootstrap.clone();
    let server = Server::new(config).await?;
    server.state().auth.ensure_default_admin(&bootstrap).await?;
    tokio::task::spawn_blocking(password::warm_up).await?;

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}
