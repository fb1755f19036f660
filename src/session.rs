use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Key/value state of one interactive session.
pub type SessionValues = Map<String, Value>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session holding `values`, live for `ttl`.
    async fn create(&self, values: SessionValues, ttl: Duration) -> anyhow::Result<Uuid>;

    /// Current values, or `None` once the session is cleared or expired.
    async fn load(&self, id: Uuid) -> anyhow::Result<Option<SessionValues>>;

    /// Drop every key of the session along with the session itself.
    async fn clear(&self, id: Uuid) -> anyhow::Result<()>;
}

struct Entry {
    values: SessionValues,
    expires_at: OffsetDateTime,
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Entry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn purge_expired(&self, now: OffsetDateTime) {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, e| e.expires_at > now);
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "expired sessions dropped");
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, values: SessionValues, ttl: Duration) -> anyhow::Result<Uuid> {
        let now = OffsetDateTime::now_utc();
        self.purge_expired(now).await;

        let id = Uuid::new_v4();
        let entry = Entry {
            values,
            expires_at: now + ttl,
        };
        self.sessions.write().await.insert(id, entry);
        Ok(id)
    }

    async fn load(&self, id: Uuid) -> anyhow::Result<Option<SessionValues>> {
        let now = OffsetDateTime::now_utc();
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&id)
            .filter(|e| e.expires_at > now)
            .map(|e| e.values.clone()))
    }

    async fn clear(&self, id: Uuid) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(mut entry) = sessions.remove(&id) {
            let keys = entry.values.len();
            entry.values.clear();
            debug!(session_id = %id, keys, "session cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> SessionValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_then_load() {
        let store = MemorySessionStore::new();
        let id = store
            .create(
                values(&[("username", json!("bob")), ("theme", json!("dark"))]),
                Duration::minutes(5),
            )
            .await
            .unwrap();

        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded["username"], "bob");
        assert_eq!(loaded["theme"], "dark");
    }

    #[tokio::test]
    async fn clear_leaves_nothing_behind() {
        let store = MemorySessionStore::new();
        let id = store
            .create(
                values(&[("a", json!(1)), ("b", json!([1, 2])), ("c", json!({"x": true}))]),
                Duration::minutes(5),
            )
            .await
            .unwrap();

        store.clear(id).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
        // clearing twice is harmless
        store.clear(id).await.unwrap();
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = MemorySessionStore::new();
        let mine = store.create(values(&[("k", json!(1))]), Duration::minutes(5)).await.unwrap();
        let theirs = store.create(values(&[("k", json!(2))]), Duration::minutes(5)).await.unwrap();

        store.clear(mine).await.unwrap();
        assert_eq!(store.load(theirs).await.unwrap().unwrap()["k"], 2);
    }

    #[tokio::test]
    async fn expired_session_is_gone() {
        let store = MemorySessionStore::new();
        let id = store.create(SessionValues::new(), Duration::seconds(-1)).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
    }
}
