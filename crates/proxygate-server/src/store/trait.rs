//! Credential store trait definition.

use super::types::{
    LogQuery, LogStats, NewSession, NewUser, Page, RequestLog, Session, StoredRequestLog, User,
    UserQuery, UserUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Store operation result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Duplicate entry: {0}")]
    Duplicate(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Query primitives over users, refresh sessions and request logs.
///
/// Every call is a single round trip that returns success, not-found
/// (`Ok(None)` / `Ok(0)`), or a transport error.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a user by primary key.
    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<User>>;

    /// Fetch a user by unique username.
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Number of active users holding the admin role.
    async fn count_admins(&self) -> StoreResult<i64>;

    /// Insert a user, failing with [`StoreError::Duplicate`] on a taken username.
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;

    /// Users ordered by id, filtered and paginated.
    async fn list_users(&self, query: &UserQuery) -> StoreResult<Page<User>>;

    /// Apply `update` to a user. `Ok(None)` when the id is unknown,
    /// [`StoreError::Duplicate`] when the new username is taken.
    async fn update_user(&self, id: i64, update: &UserUpdate) -> StoreResult<Option<User>>;

    /// Delete a user and, through the schema, their sessions. Returns rows
    /// removed.
    async fn delete_user(&self, id: i64) -> StoreResult<u64>;

    /// Persist a refresh session.
    async fn insert_session(&self, session: NewSession) -> StoreResult<()>;

    /// Find a session by refresh token that is still present and whose
    /// expiry lies strictly after `now`.
    async fn find_live_session(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;

    /// Delete the session holding `refresh_token`. Returns rows removed;
    /// zero is not an error.
    async fn delete_session(&self, refresh_token: &str) -> StoreResult<u64>;

    /// Remove every session whose expiry is at or before `now`.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Append a batch of request log records.
    async fn insert_request_logs(&self, logs: &[RequestLog]) -> StoreResult<()>;

    /// Request logs newest first, filtered and paginated.
    async fn list_request_logs(&self, query: &LogQuery) -> StoreResult<Page<StoredRequestLog>>;

    /// Aggregates over request logs timestamped in `[from, to)`.
    async fn request_log_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<LogStats>;

    /// Cheap liveness check.
    async fn ping(&self) -> StoreResult<()>;
}
