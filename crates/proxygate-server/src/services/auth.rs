//! Login, refresh and logout over the token service and the credential store.

use super::password::{check_password, hash_password_blocking};
use crate::config::BootstrapConfig;
use crate::error::{AuthError, AuthResult};
use crate::middleware::auth::{AccessToken, TokenPair, TokenService};
use crate::store::{CredentialStore, NewSession, NewUser, Role, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use proxygate_common_secret::SecretString;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Credential lifecycle service.
///
/// Token validity is checked by [`TokenService`]; session liveness and the
/// identity state are checked here against the store. Both must pass.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    /// Token service used to mint and validate.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Exchange a username and password for a token pair.
    ///
    /// Unknown users, inactive users and wrong passwords are indistinguishable
    /// to the caller. No session row is written on failure.
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<TokenPair> {
        self.login_at(username, password, Utc::now()).await
    }

    /// [`login`](Self::login) with an explicit clock.
    pub async fn login_at(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<TokenPair> {
        let user = self.store.find_user_by_username(username).await?;

        // A missing account is checked against a decoy so it costs the same.
        let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
        let password_ok = check_password(SecretString::from(password), stored_hash).await?;

        let Some(user) = user else {
            debug!(username, "Login for unknown user");
            return Err(AuthError::CredentialsInvalid);
        };

        if !password_ok {
            debug!(user_id = user.id, "Login with wrong password");
            return Err(AuthError::CredentialsInvalid);
        }

        if !user.is_active {
            debug!(user_id = user.id, "Login for inactive user");
            return Err(AuthError::CredentialsInvalid);
        }

        let pair = self.tokens.issue_pair_at(&user, now.timestamp())?;
        let access_expiry = Utc
            .timestamp_opt(pair.expires_at, 0)
            .single()
            .ok_or(AuthError::MalformedToken)?;

        self.store
            .insert_session(NewSession {
                user_id: user.id,
                refresh_token: pair.refresh_token.clone(),
                expires_at: access_expiry + (self.tokens.refresh_ttl() - self.tokens.access_ttl()),
            })
            .await?;

        info!(user_id = user.id, username = %user.username, "User logged in");
        Ok(pair)
    }

    /// Mint a new access token from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<AccessToken> {
        self.refresh_at(refresh_token, Utc::now()).await
    }

    /// [`refresh`](Self::refresh) with an explicit clock.
    pub async fn refresh_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<AccessToken> {
        // Reject forged or expired tokens before touching the store.
        let claims = self.tokens.validate_at(refresh_token, now.timestamp())?;

        if self
            .store
            .find_live_session(refresh_token, now)
            .await?
            .is_none()
        {
            debug!(user_id = claims.user_id, "Refresh with revoked session");
            return Err(AuthError::SessionRevoked);
        }

        let user = self
            .store
            .find_user_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::IdentityNotFound)?;
        if !user.is_active {
            return Err(AuthError::IdentityInactive);
        }

        self.tokens.renew_access_at(refresh_token, now.timestamp())
    }

    /// Revoke a refresh token. Absent sessions are not an error.
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let removed = self.store.delete_session(refresh_token).await?;
        debug!(removed, "Session deleted");
        Ok(())
    }

    /// Drop every expired refresh session. Returns rows removed.
    pub async fn purge_expired_sessions(&self) -> AuthResult<u64> {
        let removed = self.store.purge_expired_sessions(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    /// Create the bootstrap administrator when the store holds none.
    ///
    /// Returns whether an account was created.
    pub async fn ensure_default_admin(&self, bootstrap: &BootstrapConfig) -> AuthResult<bool> {
        if self.store.count_admins().await? > 0 {
            return Ok(false);
        }

        let password_hash = hash_password_blocking(bootstrap.admin_password.clone()).await?;
        let created = self
            .store
            .insert_user(NewUser {
                username: bootstrap.admin_username.clone(),
                password_hash,
                email: bootstrap.admin_email.clone(),
                role: Role::Admin,
                is_active: true,
            })
            .await;

        match created {
            Ok(user) => {
                info!(user_id = user.id, username = %user.username, "Created default admin");
                if bootstrap.admin_password.expose() == "admin" {
                    warn!("Default admin uses the stock password; change it");
                }
                Ok(true)
            }
            Err(StoreError::Duplicate(_)) => {
                warn!(
                    username = %bootstrap.admin_username,
                    "Bootstrap username taken by a non-admin user; no admin created"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::password::hash_password;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use std::time::Instant;

    fn service(store: Arc<MemoryStore>) -> AuthService {
        AuthService::new(
            store,
            TokenService::new(
                "test_secret_key_that_is_32_chars!".into(),
                Duration::hours(1),
                Duration::hours(24),
            ),
        )
    }

    async fn seed(store: &MemoryStore, username: &str, password: &str, role: Role) -> i64 {
        store
            .insert_user(NewUser {
                username: username.into(),
                password_hash: hash_password(password).unwrap(),
                email: None,
                role,
                is_active: true,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_login_issues_pair_and_session() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "wonderland", Role::User).await;
        let auth = service(store.clone());
        let now = Utc::now();

        let pair = auth.login_at("alice", "wonderland", now).await.unwrap();
        assert_eq!(pair.expires_at, now.timestamp() + 3600);
        assert_eq!(store.session_count(), 1);

        let session = store
            .find_live_session(&pair.refresh_token, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.expires_at.timestamp(), now.timestamp() + 24 * 3600);
    }

    #[tokio::test]
    async fn test_login_failures_write_nothing() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store, "alice", "wonderland", Role::User).await;
        let auth = service(store.clone());

        assert!(matches!(
            auth.login("alice", "looking-glass").await,
            Err(AuthError::CredentialsInvalid)
        ));
        assert!(matches!(
            auth.login("bob", "wonderland").await,
            Err(AuthError::CredentialsInvalid)
        ));

        store.set_user_active(id, false);
        assert!(matches!(
            auth.login("alice", "wonderland").await,
            Err(AuthError::CredentialsInvalid)
        ));
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_costs_a_password_check() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "wonderland", Role::User).await;
        let auth = service(store);
        crate::services::password::warm_up();

        let started = Instant::now();
        let _ = auth.login("alice", "looking-glass").await;
        let wrong_password = started.elapsed();

        let started = Instant::now();
        let _ = auth.login("nobody", "looking-glass").await;
        let unknown_user = started.elapsed();

        // Both paths run one argon2 verification; allow generous jitter.
        assert!(
            unknown_user * 4 >= wrong_password,
            "unknown user {unknown_user:?} vs wrong password {wrong_password:?}"
        );
    }

    #[tokio::test]
    async fn test_refresh_after_logout_is_revoked() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "wonderland", Role::User).await;
        let auth = service(store.clone());

        let pair = auth.login("alice", "wonderland").await.unwrap();
        let renewed = auth.refresh(&pair.refresh_token).await.unwrap();
        assert!(auth.tokens().validate(&renewed.access_token).is_ok());

        auth.logout(&pair.refresh_token).await.unwrap();
        auth.logout(&pair.refresh_token).await.unwrap();

        // Still cryptographically valid, but the session is gone.
        assert!(auth.tokens().validate(&pair.refresh_token).is_ok());
        assert!(matches!(
            auth.refresh(&pair.refresh_token).await,
            Err(AuthError::SessionRevoked)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejects_inactive_user() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store, "alice", "wonderland", Role::User).await;
        let auth = service(store.clone());

        let pair = auth.login("alice", "wonderland").await.unwrap();
        store.set_user_active(id, false);

        assert!(matches!(
            auth.refresh(&pair.refresh_token).await,
            Err(AuthError::IdentityInactive)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "wonderland", Role::User).await;
        let auth = service(store);

        let pair = auth.login("alice", "wonderland").await.unwrap();
        assert!(matches!(
            auth.refresh(&pair.access_token).await,
            Err(AuthError::SessionRevoked)
        ));
    }

    #[tokio::test]
    async fn test_purge_expired_sessions() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "wonderland", Role::User).await;
        let auth = service(store.clone());

        let long_ago = Utc::now() - Duration::days(30);
        auth.login_at("alice", "wonderland", long_ago).await.unwrap();
        auth.login("alice", "wonderland").await.unwrap();

        assert_eq!(auth.purge_expired_sessions().await.unwrap(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_ensure_default_admin_once() {
        let store = Arc::new(MemoryStore::new());
        let auth = service(store.clone());
        let bootstrap = BootstrapConfig::default();

        assert!(auth.ensure_default_admin(&bootstrap).await.unwrap());
        assert!(!auth.ensure_default_admin(&bootstrap).await.unwrap());
        assert_eq!(store.count_admins().await.unwrap(), 1);

        let pair = auth
            .login(&bootstrap.admin_username, bootstrap.admin_password.expose())
            .await
            .unwrap();
        let claims = auth.tokens().validate(&pair.access_token).unwrap();
        assert_eq!(claims.role, Role::Admin);
    }
}
