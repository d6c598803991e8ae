//! Account administration over the credential store.

use super::password::{check_password, hash_password_blocking};
use crate::error::AuthError;
use crate::store::{
    CredentialStore, NewUser, Page, Role, StoreError, User, UserQuery, UserUpdate,
};
use proxygate_common_secret::SecretString;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Shortest password accepted for new or changed accounts.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Result type for account administration.
pub type UserResult<T> = Result<T, UserError>;

/// Failures of account administration.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,

    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    /// Removing or demoting this account would leave no active admin.
    #[error("cannot remove the last admin")]
    LastAdmin,

    #[error("current password is incorrect")]
    IncorrectPassword,

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Password(#[from] AuthError),
}

impl From<StoreError> for UserError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => UserError::Conflict(what),
            other => UserError::Store(other),
        }
    }
}

/// Account to create.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub password: SecretString,
    pub email: Option<String>,
    pub role: Role,
}

/// Account changes requested by an administrator.
#[derive(Debug, Clone, Default)]
pub struct EditUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

fn check_username(username: &str) -> UserResult<()> {
    if username.trim().is_empty() {
        return Err(UserError::Invalid("username must not be empty".into()));
    }
    Ok(())
}

fn check_new_password(password: &SecretString) -> UserResult<()> {
    if password.expose().chars().count() < MIN_PASSWORD_LEN {
        return Err(UserError::Invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Creates, edits and removes identities.
///
/// Deactivating an account takes effect on the next request: the API gate
/// and the refresh path both re-read the identity.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn CredentialStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// One page of accounts matching `query`.
    pub async fn list(&self, query: &UserQuery) -> UserResult<Page<User>> {
        Ok(self.store.list_users(query).await?)
    }

    pub async fn get(&self, id: i64) -> UserResult<User> {
        self.store
            .find_user_by_id(id)
            .await?
            .ok_or(UserError::NotFound)
    }

    /// Validate, hash the password and store a new active account.
    pub async fn create(&self, req: CreateUser) -> UserResult<User> {
        check_username(&req.username)?;
        check_new_password(&req.password)?;

        let password_hash = hash_password_blocking(req.password).await?;
        let user = self
            .store
            .insert_user(NewUser {
                username: req.username.trim().to_string(),
                password_hash,
                email: req.email,
                role: req.role,
                is_active: true,
            })
            .await?;

        info!(user_id = user.id, username = %user.username, role = %user.role, "User created");
        Ok(user)
    }

    /// Apply `edit`. Demoting or deactivating the last active admin fails.
    pub async fn update(&self, id: i64, edit: EditUser) -> UserResult<User> {
        if let Some(username) = &edit.username {
            check_username(username)?;
        }

        let current = self.get(id).await?;
        let loses_admin = current.is_admin()
            && current.is_active
            && (edit.role.map_or(false, |r| r != Role::Admin) || edit.is_active == Some(false));
        if loses_admin {
            self.ensure_other_admin(id).await?;
        }

        let update = UserUpdate {
            username: edit.username.map(|u| u.trim().to_string()),
            email: edit.email,
            role: edit.role,
            is_active: edit.is_active,
            password_hash: None,
        };
        let user = self
            .store
            .update_user(id, &update)
            .await?
            .ok_or(UserError::NotFound)?;

        info!(user_id = id, is_active = user.is_active, role = %user.role, "User updated");
        Ok(user)
    }

    /// Remove the account, its sessions and its log attribution.
    pub async fn delete(&self, id: i64) -> UserResult<()> {
        let user = self.get(id).await?;
        if user.is_admin() && user.is_active {
            self.ensure_other_admin(id).await?;
        }

        if self.store.delete_user(id).await? == 0 {
            return Err(UserError::NotFound);
        }
        info!(user_id = id, username = %user.username, "User deleted");
        Ok(())
    }

    /// Replace the caller's own password after checking the current one.
    pub async fn change_password(
        &self,
        id: i64,
        current: SecretString,
        new: SecretString,
    ) -> UserResult<()> {
        check_new_password(&new)?;
        let user = self.get(id).await?;

        if !check_password(current, Some(user.password_hash)).await? {
            return Err(UserError::IncorrectPassword);
        }

        let update = UserUpdate {
            password_hash: Some(hash_password_blocking(new).await?),
            ..UserUpdate::default()
        };
        self.store
            .update_user(id, &update)
            .await?
            .ok_or(UserError::NotFound)?;

        info!(user_id = id, "Password changed");
        Ok(())
    }

    /// `id` is an active admin; fail unless another one exists.
    async fn ensure_other_admin(&self, id: i64) -> UserResult<()> {
        if self.store.count_admins().await? <= 1 {
            debug!(user_id = id, "Refusing to remove the last active admin");
            return Err(UserError::LastAdmin);
        }
        Ok(())
    }
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::password::verify_password;
    use crate::store::{MemoryStore, PageRequest};

    fn create(username: &str, role: Role) -> CreateUser {
        CreateUser {
            username: username.into(),
            password: "wonderland".into(),
            email: Some(format!("{username}@example.com")),
            role,
        }
    }

    #[tokio::test]
    async fn test_create_hashes_and_rejects_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let users = UserService::new(store.clone());

        let alice = users.create(create("alice", Role::User)).await.unwrap();
        assert!(alice.is_active);
        assert!(verify_password("wonderland", &alice.password_hash).unwrap());

        assert!(matches!(
            users.create(create("alice", Role::Admin)).await,
            Err(UserError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let users = UserService::new(Arc::new(MemoryStore::new()));

        let mut short = create("bob", Role::User);
        short.password = "12345".into();
        assert!(matches!(users.create(short).await, Err(UserError::Invalid(_))));

        assert!(matches!(
            users.create(create("  ", Role::User)).await,
            Err(UserError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_deactivate_through_update() {
        let store = Arc::new(MemoryStore::new());
        let users = UserService::new(store.clone());
        let alice = users.create(create("alice", Role::User)).await.unwrap();

        let updated = users
            .update(
                alice.id,
                EditUser {
                    is_active: Some(false),
                    ..EditUser::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert!(!store.find_user_by_id(alice.id).await.unwrap().unwrap().is_active);

        assert!(matches!(
            users.update(999, EditUser::default()).await,
            Err(UserError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_last_admin_is_protected() {
        let users = UserService::new(Arc::new(MemoryStore::new()));
        let root = users.create(create("root", Role::Admin)).await.unwrap();

        assert!(matches!(users.delete(root.id).await, Err(UserError::LastAdmin)));
        assert!(matches!(
            users
                .update(
                    root.id,
                    EditUser {
                        role: Some(Role::User),
                        ..EditUser::default()
                    }
                )
                .await,
            Err(UserError::LastAdmin)
        ));

        users.create(create("second", Role::Admin)).await.unwrap();
        users.delete(root.id).await.unwrap();
        assert!(matches!(users.get(root.id).await, Err(UserError::NotFound)));
    }

    #[tokio::test]
    async fn test_change_password() {
        let users = UserService::new(Arc::new(MemoryStore::new()));
        let alice = users.create(create("alice", Role::User)).await.unwrap();

        assert!(matches!(
            users
                .change_password(alice.id, "wrong-one".into(), "looking-glass".into())
                .await,
            Err(UserError::IncorrectPassword)
        ));

        users
            .change_password(alice.id, "wonderland".into(), "looking-glass".into())
            .await
            .unwrap();
        let stored = users.get(alice.id).await.unwrap();
        assert!(verify_password("looking-glass", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_list_hides_nothing_but_hashes() {
        let users = UserService::new(Arc::new(MemoryStore::new()));
        users.create(create("alice", Role::User)).await.unwrap();

        let page = users
            .list(&UserQuery {
                search: None,
                page: PageRequest::new(1, 10),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        let json = serde_json::to_string(&page).unwrap();
        assert!(json.contains("alice@example.com"));
        assert!(!json.contains("argon2"));
    }
}
