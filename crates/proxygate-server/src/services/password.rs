//! Argon2id password hashing.
//!
//! Hashing and verification are deliberately expensive. The async helpers
//! move that work onto the blocking pool so request tasks stay responsive.

use crate::error::{AuthError, AuthResult};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use proxygate_common_secret::SecretString;
use std::sync::OnceLock;
use tokio::task;

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswordHash(e.to_string()))
}

/// Check a password against a stored PHC string.
///
/// A mismatch is `Ok(false)`; only an unparseable hash is an error.
pub fn verify_password(password: &str, hash: &str) -> AuthResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hash with the same parameters as real accounts, used when no account exists.
fn decoy_hash() -> &'static str {
    static DECOY: OnceLock<String> = OnceLock::new();
    DECOY.get_or_init(|| hash_password("proxygate-decoy").unwrap_or_default())
}

/// Compute the decoy hash ahead of the first lookup miss.
pub fn warm_up() {
    let _ = decoy_hash();
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: SecretString) -> AuthResult<String> {
    task::spawn_blocking(move || hash_password(password.expose()))
        .await
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?
}

/// Verify `password` against `stored` on the blocking pool.
///
/// With no stored hash the password is checked against a decoy and the
/// result is always `false`, so a missing account costs as much as a wrong
/// password.
pub async fn check_password(password: SecretString, stored: Option<String>) -> AuthResult<bool> {
    task::spawn_blocking(move || match stored {
        Some(hash) => verify_password(password.expose(), &hash),
        None => {
            let _ = verify_password(password.expose(), decoy_hash());
            Ok(false)
        }
    })
    .await
    .map_err(|e| AuthError::PasswordHash(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_hash_is_error() {
        assert!(matches!(
            verify_password("x", "not-a-phc-string"),
            Err(AuthError::PasswordHash(_))
        ));
    }

    #[test]
    fn test_decoy_uses_account_parameters() {
        let decoy = PasswordHash::new(decoy_hash()).unwrap();
        let real = hash_password("anything").unwrap();
        let real = PasswordHash::new(&real).unwrap();

        assert_eq!(decoy.algorithm, real.algorithm);
        assert_eq!(decoy.params, real.params);
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let hash = hash_password_blocking("opensesame".into()).await.unwrap();
        assert!(check_password("opensesame".into(), Some(hash.clone())).await.unwrap());
        assert!(!check_password("closesesame".into(), Some(hash)).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_account_still_verifies_decoy() {
        // The decoy accepts its own password, but a missing account never does.
        assert!(verify_password("proxygate-decoy", decoy_hash()).unwrap());
        assert!(!check_password("proxygate-decoy".into(), None).await.unwrap());
    }
}
