//! PostgreSQL credential store.

use super::r#trait::{CredentialStore, StoreError, StoreResult};
use super::types::{
    CountBy, LogQuery, LogStats, NewSession, NewUser, Page, RequestLog, Role, Session,
    StoredRequestLog, User, UserQuery, UserUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

const USER_COLUMNS: &str = "id, username, password_hash, email, role, is_active, created_at";

const LOG_COLUMNS: &str = "id, user_id, remote_addr, method, url, host, user_agent, \
     status_code, response_size, duration_ms, timestamp";

/// Store backed by a sqlx Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Store over a migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        email: row.try_get("email")?,
        role: role.parse::<Role>().map_err(StoreError::Corrupt)?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        refresh_token: row.try_get("refresh_token")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn request_log_from_row(row: &PgRow) -> StoreResult<StoredRequestLog> {
    let status: i32 = row.try_get("status_code")?;
    Ok(StoredRequestLog {
        id: row.try_get("id")?,
        log: RequestLog {
            user_id: row.try_get("user_id")?,
            remote_addr: row.try_get("remote_addr")?,
            method: row.try_get("method")?,
            url: row.try_get("url")?,
            host: row.try_get("host")?,
            user_agent: row.try_get("user_agent")?,
            status_code: u16::try_from(status)
                .map_err(|_| StoreError::Corrupt(format!("status code {status}")))?,
            response_size: row.try_get("response_size")?,
            duration_ms: row.try_get("duration_ms")?,
            timestamp: row.try_get("timestamp")?,
        },
    })
}

fn push_user_filter(builder: &mut QueryBuilder<'_, Postgres>, query: &UserQuery) {
    if let Some(search) = &query.search {
        let pattern = format!("%{search}%");
        builder
            .push(" WHERE (username ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_log_filter(builder: &mut QueryBuilder<'_, Postgres>, query: &LogQuery) {
    builder.push(" WHERE TRUE");
    if let Some(user_id) = query.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(method) = &query.method {
        builder.push(" AND method = ").push_bind(method.clone());
    }
    if let Some(host) = &query.host {
        builder.push(" AND host ILIKE ").push_bind(format!("%{host}%"));
    }
    if let Some(from) = query.from {
        builder.push(" AND timestamp >= ").push_bind(from);
    }
    if let Some(to) = query.to {
        builder.push(" AND timestamp < ").push_bind(to);
    }
}

async fn grouped_counts<K>(
    pool: &PgPool,
    column: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: Option<i64>,
) -> StoreResult<Vec<CountBy<K>>>
where
    K: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + Send + Unpin,
{
    let mut sql = format!(
        "SELECT {column} AS key, COUNT(*) AS count FROM request_logs \
         WHERE timestamp >= $1 AND timestamp < $2 GROUP BY {column} ORDER BY count DESC, key"
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let rows = sqlx::query(&sql).bind(from).bind(to).fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(CountBy {
                key: row.try_get("key")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

fn map_unique_violation(err: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Duplicate(what.to_string());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn count_admins(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = $1 AND is_active")
            .bind(Role::Admin.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let sql = format!(
            "INSERT INTO users (username, password_hash, email, role, is_active) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.email)
            .bind(user.role.as_str())
            .bind(user.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, &format!("username '{}'", user.username)))?;

        user_from_row(&row)
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Page<User>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_user_filter(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_user_filter(&mut select, query);
        select
            .push(" ORDER BY id LIMIT ")
            .push_bind(query.page.limit)
            .push(" OFFSET ")
            .push_bind(query.page.offset);
        let rows = select.build().fetch_all(&self.pool).await?;

        Ok(Page {
            items: rows.iter().map(user_from_row).collect::<StoreResult<_>>()?,
            total,
        })
    }

    async fn update_user(&self, id: i64, update: &UserUpdate) -> StoreResult<Option<User>> {
        if update.is_empty() {
            return self.find_user_by_id(id).await;
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = NOW()");
        if let Some(username) = &update.username {
            builder.push(", username = ").push_bind(username.clone());
        }
        if let Some(email) = &update.email {
            builder.push(", email = ").push_bind(email.clone());
        }
        if let Some(role) = update.role {
            builder.push(", role = ").push_bind(role.as_str());
        }
        if let Some(is_active) = update.is_active {
            builder.push(", is_active = ").push_bind(is_active);
        }
        if let Some(hash) = &update.password_hash {
            builder.push(", password_hash = ").push_bind(hash.clone());
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(format!(" RETURNING {USER_COLUMNS}"));

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "username or email"))?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn delete_user(&self, id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_session(&self, session: NewSession) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (user_id, refresh_token, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(session.user_id)
        .bind(&session.refresh_token)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "refresh token"))?;

        debug!(user_id = session.user_id, "Refresh session stored");
        Ok(())
    }

    async fn find_live_session(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, user_id, refresh_token, expires_at, created_at FROM sessions \
             WHERE refresh_token = $1 AND expires_at > $2",
        )
        .bind(refresh_token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_session(&self, refresh_token: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE refresh_token = $1")
            .bind(refresh_token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_request_logs(&self, logs: &[RequestLog]) -> StoreResult<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut builder = sqlx::QueryBuilder::new(
            "INSERT INTO request_logs \
             (user_id, remote_addr, method, url, host, user_agent, status_code, response_size, duration_ms, timestamp) ",
        );
        builder.push_values(logs, |mut b, log| {
            b.push_bind(log.user_id)
                .push_bind(&log.remote_addr)
                .push_bind(&log.method)
                .push_bind(&log.url)
                .push_bind(&log.host)
                .push_bind(&log.user_agent)
                .push_bind(i32::from(log.status_code))
                .push_bind(log.response_size)
                .push_bind(log.duration_ms)
                .push_bind(log.timestamp);
        });

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn list_request_logs(&self, query: &LogQuery) -> StoreResult<Page<StoredRequestLog>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM request_logs");
        push_log_filter(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {LOG_COLUMNS} FROM request_logs"));
        push_log_filter(&mut select, query);
        select
            .push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(query.page.limit)
            .push(" OFFSET ")
            .push_bind(query.page.offset);
        let rows = select.build().fetch_all(&self.pool).await?;

        Ok(Page {
            items: rows
                .iter()
                .map(request_log_from_row)
                .collect::<StoreResult<_>>()?,
            total,
        })
    }

    async fn request_log_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<LogStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(AVG(duration_ms)::DOUBLE PRECISION, 0) AS avg \
             FROM request_logs WHERE timestamp >= $1 AND timestamp < $2",
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(LogStats {
            total_requests: row.try_get("total")?,
            avg_duration_ms: row.try_get("avg")?,
            by_method: grouped_counts(&self.pool, "method", from, to, None).await?,
            by_status: grouped_counts(&self.pool, "status_code", from, to, None).await?,
            top_hosts: grouped_counts(
                &self.pool,
                "host",
                from,
                to,
                Some(LogStats::TOP_HOSTS as i64),
            )
            .await?,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
