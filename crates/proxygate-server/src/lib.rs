//! Proxygate access-control gateway.
//!
//! Two listeners share one credential store:
//!
//! - **Tunnel** (`proxy`): CONNECT requests admitted by network allow-list,
//!   with a basic-auth fallback.
//! - **Admin API** (`routes`): JWT login, refresh and logout, behind a
//!   sliding-window rate limiter and role gates.
//!
//! Request records from both listeners flow through a bounded audit queue
//! into the store.

#![warn(clippy::all)]

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod response;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod state;
pub mod store;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use anyhow::Context;
use audit::{AuditSink, AuditWriter};
use axum::Router;
use proxy::{AccessPolicy, TunnelServer};
use shutdown::{shutdown_signal, ShutdownCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use store::{CredentialStore, RequestLog};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Owns the shared state and both listeners.
pub struct Server {
    state: AppState,
    audit_rx: Option<mpsc::Receiver<RequestLog>>,
    shutdown: ShutdownCoordinator,
}

impl Server {
    /// Connect to the configured store and build the server.
    pub async fn new(config: ServerConfig) -> Result<Self, anyhow::Error> {
        let store = db::connect_store(&config.database)
            .await
            .context("Failed to open credential store")?;
        Ok(Self::with_store(config, store))
    }

    /// Build the server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn CredentialStore>) -> Self {
        let (audit, audit_rx) = if config.audit.enabled {
            let (sink, rx) = AuditSink::new(config.audit.buffer_size);
            (sink, Some(rx))
        } else {
            (AuditSink::disabled(), None)
        };

        Self {
            state: AppState::new(config, store, audit),
            audit_rx,
            shutdown: ShutdownCoordinator::default(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Coordinator stopping both listeners and the background tasks.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Build the admin API router.
    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    /// Run both listeners until a termination signal, then drain.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let Self {
            state,
            audit_rx,
            shutdown,
        } = self;
        let config = state.config.clone();

        let writer = audit_rx.map(|rx| {
            AuditWriter::new(
                state.store.clone(),
                rx,
                config.audit.batch_size,
                config.audit.flush_interval(),
            )
            .spawn(shutdown.clone())
        });

        let sweeper = config.rate_limit.enabled.then(|| {
            state
                .limiter
                .clone()
                .spawn_sweeper(config.rate_limit.sweep_interval(), shutdown.clone())
        });

        let policy = AccessPolicy::from_config(&config.proxy, state.store.clone());
        if policy.allow_list().is_empty() {
            warn!("Tunnel allow-list is empty; every client must authenticate");
        }
        let tunnel = TunnelServer::bind(
            &config.proxy,
            policy,
            state.audit.clone(),
            shutdown.clone(),
        )
        .await?;
        let tunnel_task = tokio::spawn(tunnel.run());

        let api_addr = config.api.socket_addr().context("Invalid API address")?;
        let listener = TcpListener::bind(api_addr)
            .await
            .with_context(|| format!("Failed to bind API listener on {api_addr}"))?;
        info!(addr = %api_addr, "Admin API listening");

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.initiate();
            }
        });

        let app = routes::create_router(state);
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await;

        // Covers the API listener failing on its own.
        shutdown.initiate();

        let drain = async {
            let _ = tunnel_task.await;
            if let Some(sweeper) = sweeper {
                let _ = sweeper.await;
            }
            if let Some(writer) = writer {
                let _ = writer.await;
            }
        };
        if tokio::time::timeout(shutdown.timeout(), drain).await.is_err() {
            warn!("Background tasks did not stop within the shutdown timeout");
        }
        shutdown.complete();

        served.context("Admin API server failed")
    }
}
