//! Shared state for API handlers.

use crate::audit::AuditSink;
use crate::config::ServerConfig;
use crate::middleware::auth::TokenService;
use crate::middleware::rate_limit::{SlidingWindowLimiter, WindowConfig};
use crate::proxy::AllowList;
use crate::services::{AuthService, UserService};
use crate::store::CredentialStore;
use std::sync::Arc;
use std::time::Instant;

/// Everything a handler or middleware layer may need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub tokens: TokenService,
    pub auth: AuthService,
    pub users: UserService,
    pub limiter: Arc<SlidingWindowLimiter>,
    /// Peers allowed to name the client through forwarding headers.
    pub trusted_proxies: Arc<AllowList>,
    pub audit: AuditSink,
    pub started_at: Instant,
}

impl AppState {
    /// Derive the token, account and limiter services from `config`.
    pub fn new(config: ServerConfig, store: Arc<dyn CredentialStore>, audit: AuditSink) -> Self {
        let tokens = TokenService::new(
            config.auth.jwt_secret.clone(),
            config.auth.access_ttl(),
            config.auth.refresh_ttl(),
        );
        let auth = AuthService::new(store.clone(), tokens.clone());
        let users = UserService::new(store.clone());
        let limiter = Arc::new(SlidingWindowLimiter::new(WindowConfig::from(
            &config.rate_limit,
        )));
        let trusted_proxies = Arc::new(AllowList::from_entries(&config.rate_limit.trusted_proxies));

        Self {
            config: Arc::new(config),
            store,
            tokens,
            auth,
            users,
            limiter,
            trusted_proxies,
            audit,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the state was built.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
