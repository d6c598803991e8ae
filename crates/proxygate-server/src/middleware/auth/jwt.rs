//! JWT encoding and decoding utilities.

use super::types::{AccessToken, Claims, TokenPair, TokenType, ISSUER};
use crate::error::{AuthError, AuthResult};
use crate::store::User;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use proxygate_common_secret::SecretString;
use std::sync::Arc;
use tracing::debug;

/// Encode claims into an HS256 token.
pub fn encode_token(claims: &Claims, secret: &SecretString) -> AuthResult<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.expose().as_bytes()),
    )
    .map_err(AuthError::Signing)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    // Time bounds are checked against the caller's clock in `validate_at`.
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.leeway = 0;
    validation.set_issuer(&[ISSUER]);
    validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
    validation
}

/// Verify signature, algorithm and issuer, then check the validity window at `now`.
pub fn validate_at(token: &str, secret: &SecretString, now: i64) -> AuthResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose().as_bytes()),
        &validation(),
    )?;
    let claims = data.claims;

    if claims.is_premature_at(now) || claims.is_expired_at(now) {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Validate against the wall clock.
pub fn validate(token: &str, secret: &SecretString) -> AuthResult<Claims> {
    validate_at(token, secret, Utc::now().timestamp())
}

/// Mint an access/refresh pair for `user` issued at `now`.
pub fn issue_pair_at(
    user: &User,
    secret: &SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
    now: i64,
) -> AuthResult<TokenPair> {
    let access = Claims::for_user(user, TokenType::Access, now, access_ttl.num_seconds());
    let refresh = Claims::for_user(user, TokenType::Refresh, now, refresh_ttl.num_seconds());

    Ok(TokenPair {
        access_token: encode_token(&access, secret)?,
        refresh_token: encode_token(&refresh, secret)?,
        expires_at: access.exp,
    })
}

/// Mint a pair against the wall clock.
pub fn issue_pair(
    user: &User,
    secret: &SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
) -> AuthResult<TokenPair> {
    issue_pair_at(user, secret, access_ttl, refresh_ttl, Utc::now().timestamp())
}

/// Mint a fresh access credential from a valid refresh credential.
///
/// Only token validity is checked here. Session liveness and identity
/// state belong to the caller.
pub fn renew_access_at(
    refresh_token: &str,
    secret: &SecretString,
    access_ttl: Duration,
    now: i64,
) -> AuthResult<AccessToken> {
    let claims = validate_at(refresh_token, secret, now)?;
    if claims.token_type != TokenType::Refresh {
        return Err(AuthError::MalformedToken);
    }

    let access = claims.renewed(TokenType::Access, now, access_ttl.num_seconds());
    debug!(user_id = access.user_id, "Access token renewed");

    Ok(AccessToken {
        access_token: encode_token(&access, secret)?,
        expires_at: access.exp,
    })
}

/// Renew against the wall clock.
pub fn renew_access(
    refresh_token: &str,
    secret: &SecretString,
    access_ttl: Duration,
) -> AuthResult<AccessToken> {
    renew_access_at(refresh_token, secret, access_ttl, Utc::now().timestamp())
}

/// Token service holding the signing secret and horizons.
///
/// Immutable once built; cloned freely across tasks.
#[derive(Clone)]
pub struct TokenService {
    secret: Arc<SecretString>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// HS256 service signing with `secret`.
    pub fn new(secret: SecretString, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: Arc::new(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Lifetime of issued access tokens.
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Lifetime of issued refresh tokens.
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue an access and refresh token for `user`, valid from now.
    pub fn issue_pair(&self, user: &User) -> AuthResult<TokenPair> {
        issue_pair(user, &self.secret, self.access_ttl, self.refresh_ttl)
    }

    pub fn issue_pair_at(&self, user: &User, now: i64) -> AuthResult<TokenPair> {
        issue_pair_at(user, &self.secret, self.access_ttl, self.refresh_ttl, now)
    }

    /// Check signature, issuer and time bounds of `token`.
    pub fn validate(&self, token: &str) -> AuthResult<Claims> {
        validate(token, &self.secret)
    }

    pub fn validate_at(&self, token: &str, now: i64) -> AuthResult<Claims> {
        validate_at(token, &self.secret, now)
    }

    /// Mint a fresh access token from a valid refresh token.
    pub fn renew_access(&self, refresh_token: &str) -> AuthResult<AccessToken> {
        renew_access(refresh_token, &self.secret, self.access_ttl)
    }

    pub fn renew_access_at(&self, refresh_token: &str, now: i64) -> AuthResult<AccessToken> {
        renew_access_at(refresh_token, &self.secret, self.access_ttl, now)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &self.secret)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;
    use proptest::prelude::*;

    const SECRET: &str = "test_secret_key_that_is_32_chars!";
    const T0: i64 = 1_700_000_000;

    fn user(id: i64, username: &str, role: Role) -> User {
        User {
            id,
            username: username.to_string(),
            password_hash: String::new(),
            email: None,
            role,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn service() -> TokenService {
        TokenService::new(SECRET.into(), Duration::hours(1), Duration::hours(24))
    }

    #[test]
    fn test_issue_and_validate_pair() {
        let svc = service();
        let pair = svc.issue_pair_at(&user(42, "alice", Role::Admin), T0).unwrap();

        assert_eq!(pair.expires_at, T0 + 3600);

        let access = svc.validate_at(&pair.access_token, T0 + 10).unwrap();
        assert_eq!(access.user_id, 42);
        assert_eq!(access.username, "alice");
        assert_eq!(access.role, Role::Admin);
        assert_eq!(access.token_type, TokenType::Access);
        assert_eq!(access.iss, ISSUER);

        let refresh = svc.validate_at(&pair.refresh_token, T0 + 10).unwrap();
        assert_eq!(refresh.token_type, TokenType::Refresh);
        assert_eq!(refresh.exp, T0 + 24 * 3600);
    }

    #[test]
    fn test_expiry_is_exclusive() {
        let svc = service();
        let pair = svc.issue_pair_at(&user(1, "bob", Role::User), T0).unwrap();

        assert!(svc.validate_at(&pair.access_token, T0 + 3599).is_ok());
        assert!(matches!(
            svc.validate_at(&pair.access_token, T0 + 3600),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_not_yet_valid_rejected() {
        let svc = service();
        let pair = svc.issue_pair_at(&user(1, "bob", Role::User), T0).unwrap();

        assert!(matches!(
            svc.validate_at(&pair.access_token, T0 - 1),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let pair = service().issue_pair_at(&user(1, "bob", Role::User), T0).unwrap();
        let other: SecretString = "another_secret_that_is_32_chars!!".into();

        assert!(matches!(
            validate_at(&pair.access_token, &other, T0),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let svc = service();
        let pair = svc.issue_pair_at(&user(1, "bob", Role::User), T0).unwrap();
        let forged = svc.issue_pair_at(&user(1, "bob", Role::Admin), T0).unwrap();

        // Splice the admin payload onto the user signature.
        let original: Vec<&str> = pair.access_token.split('.').collect();
        let promoted: Vec<&str> = forged.access_token.split('.').collect();
        let spliced = format!("{}.{}.{}", original[0], promoted[1], original[2]);

        assert!(matches!(
            svc.validate_at(&spliced, T0),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let claims = Claims::new(1, "bob", Role::User, TokenType::Access, T0, 60);
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            service().validate_at(&token, T0),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let mut claims = Claims::new(1, "bob", Role::User, TokenType::Access, T0, 60);
        claims.iss = "someone-else".to_string();
        let token = encode_token(&claims, &SECRET.into()).unwrap();

        assert!(matches!(
            service().validate_at(&token, T0),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            service().validate_at("not-a-token", T0),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn test_renew_access_from_refresh() {
        let svc = service();
        let pair = svc.issue_pair_at(&user(5, "carol", Role::User), T0).unwrap();

        let later = T0 + 7200;
        let renewed = svc.renew_access_at(&pair.refresh_token, later).unwrap();
        assert_eq!(renewed.expires_at, later + 3600);

        let claims = svc.validate_at(&renewed.access_token, later).unwrap();
        assert_eq!(claims.user_id, 5);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn test_renew_rejects_access_token() {
        let svc = service();
        let pair = svc.issue_pair_at(&user(5, "carol", Role::User), T0).unwrap();

        assert!(matches!(
            svc.renew_access_at(&pair.access_token, T0),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn test_renew_rejects_expired_refresh() {
        let svc = service();
        let pair = svc.issue_pair_at(&user(5, "carol", Role::User), T0).unwrap();

        assert!(matches!(
            svc.renew_access_at(&pair.refresh_token, T0 + 24 * 3600),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", service());
        assert!(!rendered.contains(SECRET));
    }

    proptest! {
        #[test]
        fn prop_identity_survives_round_trip(id in 1i64..i64::MAX / 2, name in "[a-z]{1,16}") {
            let svc = service();
            let pair = svc.issue_pair_at(&user(id, &name, Role::User), T0).unwrap();
            let claims = svc.validate_at(&pair.access_token, T0).unwrap();
            prop_assert_eq!(claims.user_id, id);
            prop_assert_eq!(claims.username, name);
        }
    }
}
