use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use super::{KeyValueStore, Scope, StorageError};

struct StoredValue {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<(Scope, String), StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, expired ones included until touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, v| v.is_live(now));
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>, StorageError> {
        let id = (scope, key.to_string());
        let now = Instant::now();
        if let Some(stored) = self.entries.get(&id) {
            if stored.is_live(now) {
                return Ok(Some(stored.value.clone()));
            }
        }
        self.entries.remove_if(&id, |_, v| !v.is_live(now));
        Ok(None)
    }

    async fn set(
        &self,
        scope: Scope,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert((scope, key.to_string()), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, scope: Scope, key: &str) -> Result<(), StorageError> {
        self.entries.remove(&(scope, key.to_string()));
        Ok(())
    }

    async fn clear(&self, scope: Scope) -> Result<(), StorageError> {
        self.entries.retain(|(s, _), _| *s != scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set(Scope::User(1), "draft", json!({"step": 2}), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(
            store.get(Scope::User(1), "draft").await.unwrap(),
            Some(json!({"step": 2}))
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get(Scope::User(1), "draft").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let store = MemoryStore::new();
        store.set(Scope::User(7), "k", json!(1), None).await.unwrap();
        store.set(Scope::Chat(7), "k", json!(2), None).await.unwrap();
        store.set(Scope::User(7), "other", json!(3), None).await.unwrap();

        store.clear(Scope::User(7)).await.unwrap();

        assert_eq!(store.get(Scope::User(7), "k").await.unwrap(), None);
        assert_eq!(store.get(Scope::User(7), "other").await.unwrap(), None);
        assert_eq!(store.get(Scope::Chat(7), "k").await.unwrap(), Some(json!(2)));
    }
}
