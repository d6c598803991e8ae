//! Records held by the credential store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Stored identity.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Identity to insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub role: Role,
    pub is_active: bool,
}

/// Persisted refresh session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session is live only strictly before its expiry.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Refresh session to insert.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// One handled request, from either listener.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub user_id: Option<i64>,
    pub remote_addr: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub user_agent: String,
    pub status_code: u16,
    pub response_size: i64,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Field changes for an existing identity. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password_hash: Option<String>,
}

impl UserUpdate {
    /// No field would change.
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.is_active.is_none()
            && self.password_hash.is_none()
    }

    /// Apply the changes to `user` in place.
    pub fn apply(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(email) = &self.email {
            user.email = Some(email.clone());
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
    }
}

/// Offset pagination shared by the listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: i64,
    pub limit: i64,
}

impl PageRequest {
    /// Largest page a caller may ask for.
    pub const MAX_LIMIT: i64 = 500;

    /// One-based `page` of `limit` rows. Out-of-range values are clamped.
    pub fn new(page: i64, limit: i64) -> Self {
        let limit = limit.clamp(1, Self::MAX_LIMIT);
        let page = page.max(1);
        Self {
            offset: (page - 1).saturating_mul(limit),
            limit,
        }
    }
}

/// One page of rows plus the total matching count.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// User listing filter.
#[derive(Debug, Clone)]
pub struct UserQuery {
    /// Case-insensitive substring of username or email.
    pub search: Option<String>,
    pub page: PageRequest,
}

/// Stored request log with its row id.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRequestLog {
    pub id: i64,
    #[serde(flatten)]
    pub log: RequestLog,
}

/// Request log listing filter. Bounds are inclusive `from`, exclusive `to`.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub user_id: Option<i64>,
    pub method: Option<String>,
    /// Case-insensitive substring of the host.
    pub host: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: PageRequest,
}

impl LogQuery {
    /// Whether `log` passes every filter except pagination.
    pub fn matches(&self, log: &RequestLog) -> bool {
        self.user_id.map_or(true, |id| log.user_id == Some(id))
            && self.method.as_deref().map_or(true, |m| log.method == m)
            && self
                .host
                .as_deref()
                .map_or(true, |h| log.host.to_lowercase().contains(&h.to_lowercase()))
            && self.from.map_or(true, |from| log.timestamp >= from)
            && self.to.map_or(true, |to| log.timestamp < to)
    }
}

/// Row count for one grouping value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountBy<K> {
    pub key: K,
    pub count: i64,
}

/// Aggregates over request logs in `[from, to)`.
#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub total_requests: i64,
    pub by_method: Vec<CountBy<String>>,
    pub by_status: Vec<CountBy<i32>>,
    /// Busiest hosts, at most [`LogStats::TOP_HOSTS`].
    pub top_hosts: Vec<CountBy<String>>,
    pub avg_duration_ms: f64,
}

impl LogStats {
    /// Hosts reported in [`top_hosts`](Self::top_hosts).
    pub const TOP_HOSTS: usize = 10;
}
