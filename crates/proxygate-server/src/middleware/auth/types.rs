//! Authentication types.

use crate::store::{Role, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed issuer carried by every credential this service mints.
pub const ISSUER: &str = "proxygate";

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity primary key.
    pub user_id: i64,
    /// Identity username.
    pub username: String,
    /// Identity role at issuance.
    pub role: Role,
    /// Token type (access/refresh).
    pub token_type: TokenType,
    /// Issued at timestamp.
    pub iat: i64,
    /// Not valid before timestamp.
    pub nbf: i64,
    /// Expiration timestamp (exclusive).
    pub exp: i64,
    /// Subject (username).
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Token id, unique per minted credential.
    pub jti: String,
}

/// Token type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

impl Claims {
    /// Build claims for `user` valid over `[issued_at, issued_at + ttl_secs)`.
    pub fn for_user(user: &User, token_type: TokenType, issued_at: i64, ttl_secs: i64) -> Self {
        Self::new(user.id, &user.username, user.role, token_type, issued_at, ttl_secs)
    }

    /// Build claims from identity fields.
    pub fn new(
        user_id: i64,
        username: &str,
        role: Role,
        token_type: TokenType,
        issued_at: i64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            user_id,
            username: username.to_string(),
            role,
            token_type,
            iat: issued_at,
            nbf: issued_at,
            exp: issued_at + ttl_secs,
            sub: username.to_string(),
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Re-mint these identity fields as a fresh credential.
    pub fn renewed(&self, token_type: TokenType, issued_at: i64, ttl_secs: i64) -> Self {
        Self::new(self.user_id, &self.username, self.role, token_type, issued_at, ttl_secs)
    }

    /// Expiry is exclusive: a token is expired at exactly `exp`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }

    /// Whether `now` lies before the not-before bound.
    pub fn is_premature_at(&self, now: i64) -> bool {
        now < self.nbf
    }
}

/// Access and refresh credentials minted together at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry, unix seconds.
    pub expires_at: i64,
}

/// Freshly minted access credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Authenticated identity attached to the request context.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub claims: Claims,
}

impl AuthUser {
    /// Build from validated claims and the freshly fetched identity.
    ///
    /// Role comes from the store record, so a demotion applies immediately.
    pub fn new(user: &User, claims: Claims) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            claims,
        }
    }

    /// Check if user has admin role.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_window() {
        let claims = Claims::new(1, "alice", Role::User, TokenType::Access, 1_000, 60);
        assert_eq!(claims.nbf, 1_000);
        assert_eq!(claims.exp, 1_060);
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss, ISSUER);

        assert!(claims.is_premature_at(999));
        assert!(!claims.is_expired_at(1_059));
        assert!(claims.is_expired_at(1_060));
    }

    #[test]
    fn test_renewed_keeps_identity_with_new_id() {
        let refresh = Claims::new(9, "bob", Role::Admin, TokenType::Refresh, 0, 600);
        let access = refresh.renewed(TokenType::Access, 100, 60);

        assert_eq!(access.user_id, 9);
        assert_eq!(access.username, "bob");
        assert_eq!(access.role, Role::Admin);
        assert_eq!(access.token_type, TokenType::Access);
        assert_eq!(access.exp, 160);
        assert_ne!(access.jti, refresh.jti);
    }
}
