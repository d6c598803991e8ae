//! Store selection from configuration.

use super::config::DbConfig;
use crate::store::{CredentialStore, MemoryStore, PgStore};
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Open the store named by `config.url`.
///
/// `memory://` yields a fresh in-memory store; anything else is a Postgres
/// URL, migrated on open unless `run_migrations` is off.
pub async fn connect_store(config: &DbConfig) -> Result<Arc<dyn CredentialStore>> {
    if config.is_memory() {
        warn!("Using in-memory credential store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = connect_pg(config).await?;
    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Store migrations applied");
    }

    Ok(Arc::new(PgStore::new(pool)))
}

async fn connect_pg(config: &DbConfig) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.url).context("Invalid database URL")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        .max_lifetime(Some(config.max_lifetime()))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to {}", config.redacted_url()))?;

    info!(
        url = %config.redacted_url(),
        max_connections = config.max_connections,
        "Connected to credential store"
    );
    Ok(pool)
}
