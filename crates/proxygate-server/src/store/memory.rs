//! In-memory credential store.
//!
//! Backs tests and `memory://` local runs. Contents are lost on restart.

use super::r#trait::{CredentialStore, StoreError, StoreResult};
use super::types::{
    CountBy, LogQuery, LogStats, NewSession, NewUser, Page, RequestLog, Role, Session,
    StoredRequestLog, User, UserQuery, UserUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Inner {
    users: HashMap<i64, User>,
    sessions: HashMap<String, Session>,
    logs: Vec<RequestLog>,
    next_user_id: i64,
    next_session_id: i64,
}

/// In-memory store implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the active flag of a user. Returns false when the user is unknown.
    pub fn set_user_active(&self, id: i64, active: bool) -> bool {
        match self.inner.lock().users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Make every subsequent call fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored sessions, expired ones included.
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Snapshot of appended request logs.
    pub fn request_logs(&self) -> Vec<RequestLog> {
        self.inner.lock().logs.clone()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

/// Group counts, largest first, ties in key order.
fn count_by<K: Ord>(keys: impl Iterator<Item = K>) -> Vec<CountBy<K>> {
    let mut counts = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0i64) += 1;
    }
    let mut grouped: Vec<_> = counts
        .into_iter()
        .map(|(key, count)| CountBy { key, count })
        .collect();
    grouped.sort_by(|a, b| b.count.cmp(&a.count));
    grouped
}

fn window<T: Clone>(items: &[T], offset: i64, limit: i64) -> Vec<T> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    let len = usize::try_from(limit).unwrap_or(0);
    items.iter().skip(start).take(len).cloned().collect()
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        self.check_available()?;
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn count_admins(&self) -> StoreResult<i64> {
        self.check_available()?;
        let count = self
            .inner
            .lock()
            .users
            .values()
            .filter(|u| u.role == Role::Admin && u.is_active)
            .count();
        Ok(count as i64)
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        self.check_available()?;
        let mut inner = self.inner.lock();

        if inner.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate(format!("username '{}'", user.username)));
        }

        inner.next_user_id += 1;
        let stored = User {
            id: inner.next_user_id,
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            created_at: Utc::now(),
        };
        inner.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Page<User>> {
        self.check_available()?;
        let needle = query.search.as_deref().map(str::to_lowercase);
        let inner = self.inner.lock();

        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|u| {
                needle.as_deref().map_or(true, |n| {
                    u.username.to_lowercase().contains(n)
                        || u.email.as_deref().map_or(false, |e| e.to_lowercase().contains(n))
                })
            })
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);

        Ok(Page {
            items: window(&users, query.page.offset, query.page.limit),
            total: users.len() as i64,
        })
    }

    async fn update_user(&self, id: i64, update: &UserUpdate) -> StoreResult<Option<User>> {
        self.check_available()?;
        let mut inner = self.inner.lock();

        if let Some(username) = &update.username {
            if inner.users.values().any(|u| u.id != id && &u.username == username) {
                return Err(StoreError::Duplicate(format!("username '{username}'")));
            }
        }

        Ok(inner.users.get_mut(&id).map(|user| {
            update.apply(user);
            user.clone()
        }))
    }

    async fn delete_user(&self, id: i64) -> StoreResult<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        if inner.users.remove(&id).is_none() {
            return Ok(0);
        }

        inner.sessions.retain(|_, s| s.user_id != id);
        for log in inner.logs.iter_mut().filter(|l| l.user_id == Some(id)) {
            log.user_id = None;
        }
        Ok(1)
    }

    async fn insert_session(&self, session: NewSession) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();

        if inner.sessions.contains_key(&session.refresh_token) {
            return Err(StoreError::Duplicate("refresh token".into()));
        }

        inner.next_session_id += 1;
        let stored = Session {
            id: inner.next_session_id,
            user_id: session.user_id,
            refresh_token: session.refresh_token,
            expires_at: session.expires_at,
            created_at: Utc::now(),
        };
        inner.sessions.insert(stored.refresh_token.clone(), stored);
        Ok(())
    }

    async fn find_live_session(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .sessions
            .get(refresh_token)
            .filter(|s| s.is_live_at(now))
            .cloned())
    }

    async fn delete_session(&self, refresh_token: &str) -> StoreResult<u64> {
        self.check_available()?;
        let removed = self.inner.lock().sessions.remove(refresh_token);
        Ok(u64::from(removed.is_some()))
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.is_live_at(now));
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn insert_request_logs(&self, logs: &[RequestLog]) -> StoreResult<()> {
        self.check_available()?;
        self.inner.lock().logs.extend_from_slice(logs);
        Ok(())
    }

    async fn list_request_logs(&self, query: &LogQuery) -> StoreResult<Page<StoredRequestLog>> {
        self.check_available()?;
        let inner = self.inner.lock();

        let mut matching: Vec<StoredRequestLog> = inner
            .logs
            .iter()
            .enumerate()
            .filter(|(_, log)| query.matches(log))
            .map(|(i, log)| StoredRequestLog {
                id: i as i64 + 1,
                log: log.clone(),
            })
            .collect();
        matching.sort_by(|a, b| {
            b.log
                .timestamp
                .cmp(&a.log.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(Page {
            items: window(&matching, query.page.offset, query.page.limit),
            total: matching.len() as i64,
        })
    }

    async fn request_log_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<LogStats> {
        self.check_available()?;
        let inner = self.inner.lock();
        let logs: Vec<&RequestLog> = inner
            .logs
            .iter()
            .filter(|l| l.timestamp >= from && l.timestamp < to)
            .collect();

        let total = logs.len() as i64;
        let avg_duration_ms = if logs.is_empty() {
            0.0
        } else {
            logs.iter().map(|l| l.duration_ms as f64).sum::<f64>() / logs.len() as f64
        };
        let mut top_hosts = count_by(logs.iter().map(|l| l.host.clone()));
        top_hosts.truncate(LogStats::TOP_HOSTS);

        Ok(LogStats {
            total_requests: total,
            by_method: count_by(logs.iter().map(|l| l.method.clone())),
            by_status: count_by(logs.iter().map(|l| i32::from(l.status_code))),
            top_hosts,
            avg_duration_ms,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PageRequest;
    use chrono::Duration;

    fn new_user(username: &str, role: Role) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            email: None,
            role,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_user() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("alice", Role::User)).await.unwrap();

        let by_id = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");

        let by_name = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);

        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = MemoryStore::new();
        store.insert_user(new_user("alice", Role::User)).await.unwrap();
        let err = store.insert_user(new_user("alice", Role::Admin)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_count_admins() {
        let store = MemoryStore::new();
        assert_eq!(store.count_admins().await.unwrap(), 0);
        store.insert_user(new_user("root", Role::Admin)).await.unwrap();
        store.insert_user(new_user("alice", Role::User)).await.unwrap();
        assert_eq!(store.count_admins().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_liveness_and_delete() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_session(NewSession {
                user_id: 1,
                refresh_token: "live".into(),
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();
        store
            .insert_session(NewSession {
                user_id: 1,
                refresh_token: "stale".into(),
                expires_at: now - Duration::seconds(1),
            })
            .await
            .unwrap();

        assert!(store.find_live_session("live", now).await.unwrap().is_some());
        assert!(store.find_live_session("stale", now).await.unwrap().is_none());

        assert_eq!(store.delete_session("live").await.unwrap(), 1);
        assert_eq!(store.delete_session("live").await.unwrap(), 0);
        assert!(store.find_live_session("live", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_sessions() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (token, offset) in [("a", -10), ("b", 0), ("c", 10)] {
            store
                .insert_session(NewSession {
                    user_id: 1,
                    refresh_token: token.into(),
                    expires_at: now + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.purge_expired_sessions(now).await.unwrap(), 2);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_user() {
        let store = MemoryStore::new();
        let alice = store.insert_user(new_user("alice", Role::User)).await.unwrap();
        let bob = store.insert_user(new_user("bob", Role::User)).await.unwrap();
        store
            .insert_session(NewSession {
                user_id: alice.id,
                refresh_token: "alice-token".into(),
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        let deactivate = UserUpdate {
            is_active: Some(false),
            ..UserUpdate::default()
        };
        let updated = store.update_user(alice.id, &deactivate).await.unwrap().unwrap();
        assert!(!updated.is_active);
        assert!(store.update_user(999, &deactivate).await.unwrap().is_none());

        let rename = UserUpdate {
            username: Some("bob".into()),
            ..UserUpdate::default()
        };
        assert!(matches!(
            store.update_user(alice.id, &rename).await,
            Err(StoreError::Duplicate(_))
        ));
        // Renaming to one's own name is not a conflict.
        let same = UserUpdate {
            username: Some("bob".into()),
            ..UserUpdate::default()
        };
        assert!(store.update_user(bob.id, &same).await.unwrap().is_some());

        assert_eq!(store.delete_user(alice.id).await.unwrap(), 1);
        assert_eq!(store.delete_user(alice.id).await.unwrap(), 0);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_list_users_search_and_paging() {
        let store = MemoryStore::new();
        for name in ["alice", "alfred", "bob"] {
            store.insert_user(new_user(name, Role::User)).await.unwrap();
        }

        let page = store
            .list_users(&UserQuery {
                search: Some("AL".into()),
                page: PageRequest::new(1, 1),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].username, "alice");

        let second = store
            .list_users(&UserQuery {
                search: Some("al".into()),
                page: PageRequest::new(2, 1),
            })
            .await
            .unwrap();
        assert_eq!(second.items[0].username, "alfred");
    }

    #[tokio::test]
    async fn test_request_logs_listing_and_stats() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let log = |method: &str, host: &str, status: u16, duration_ms: i64, age: i64| RequestLog {
            user_id: None,
            remote_addr: "10.0.0.1".into(),
            method: method.into(),
            url: host.into(),
            host: host.into(),
            user_agent: String::new(),
            status_code: status,
            response_size: 0,
            duration_ms,
            timestamp: now - Duration::seconds(age),
        };
        store
            .insert_request_logs(&[
                log("CONNECT", "a.example:443", 200, 10, 30),
                log("CONNECT", "a.example:443", 407, 20, 20),
                log("GET", "gate.local", 200, 30, 10),
                log("GET", "gate.local", 200, 40, 3600),
            ])
            .await
            .unwrap();

        let page = store
            .list_request_logs(&LogQuery {
                user_id: None,
                method: Some("CONNECT".into()),
                host: None,
                from: None,
                to: None,
                page: PageRequest::new(1, 10),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        // Newest first.
        assert_eq!(page.items[0].log.status_code, 407);
        assert_eq!(page.items[0].id, 2);

        let stats = store
            .request_log_stats(now - Duration::minutes(1), now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.by_method[0], CountBy { key: "CONNECT".to_string(), count: 2 });
        assert_eq!(stats.by_status[0], CountBy { key: 200, count: 2 });
        assert_eq!(stats.top_hosts[0].key, "a.example:443");
        assert!((stats.avg_duration_ms - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.find_user_by_id(1).await.is_err());

        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
