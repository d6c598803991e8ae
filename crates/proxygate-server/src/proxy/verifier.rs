//! Basic-credential verification for the tunnel fallback path.

use crate::services::password::check_password;
use crate::store::CredentialStore;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use proxygate_common_secret::SecretString;
use std::sync::Arc;
use tracing::{debug, warn};

/// Username/password pair from a `Proxy-Authorization: Basic` header.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: SecretString,
}

impl BasicCredentials {
    /// Parse a `Basic <base64(user:pass)>` header value.
    ///
    /// The password may itself contain `:`; only the first one separates.
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, encoded) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;

        Some(Self {
            username: username.to_string(),
            password: SecretString::from(password),
        })
    }
}

/// Who presented accepted tunnel credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub username: String,
    /// Store identity, when the verifier is backed by one.
    pub user_id: Option<i64>,
}

/// Pluggable check deciding whether tunnel credentials are acceptable.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `Some` with the accepted identity, `None` to challenge.
    async fn verify(&self, credentials: &BasicCredentials) -> Option<VerifiedIdentity>;
}

/// Accepts exactly one configured username/password pair.
pub struct StaticCredentialVerifier {
    username: SecretString,
    password: SecretString,
}

impl StaticCredentialVerifier {
    /// Accept exactly this username and password.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: SecretString::new(username.into()),
            password,
        }
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(&self, credentials: &BasicCredentials) -> Option<VerifiedIdentity> {
        // Both halves must match; evaluate both to keep timing uniform.
        let user_ok = self.username.matches(&credentials.username);
        let pass_ok = self.password.matches(credentials.password.expose());
        (user_ok & pass_ok).then(|| VerifiedIdentity {
            username: credentials.username.clone(),
            user_id: None,
        })
    }
}

/// Accepts any active identity whose password verifies.
pub struct StoreCredentialVerifier {
    store: Arc<dyn CredentialStore>,
}

impl StoreCredentialVerifier {
    /// Check credentials against active accounts in `store`.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialVerifier for StoreCredentialVerifier {
    async fn verify(&self, credentials: &BasicCredentials) -> Option<VerifiedIdentity> {
        let user = match self.store.find_user_by_username(&credentials.username).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Credential store lookup failed during tunnel auth");
                return None;
            }
        };

        let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
        let password_ok = match check_password(credentials.password.clone(), stored_hash).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "Stored password hash unreadable");
                false
            }
        };

        let Some(user) = user else {
            debug!(username = %credentials.username, "Tunnel credentials for unknown user");
            return None;
        };
        if !user.is_active {
            debug!(user_id = user.id, "Tunnel credentials for inactive user");
            return None;
        }

        password_ok.then(|| VerifiedIdentity {
            username: user.username,
            user_id: Some(user.id),
        })
    }
}
