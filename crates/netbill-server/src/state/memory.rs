//! In-memory state backend

use super::{StateBackend, StateError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// In-memory state backend
///
/// Keeps everything in a local HashMap behind a `tokio::sync::RwLock`.
/// No persistence, no cross-node visibility; the default for tests and
/// single-node deployments without a configured cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateBackend {
    store: Arc<RwLock<HashMap<String, StoredValue>>>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<SystemTime>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|duration| SystemTime::now() + duration);
        Self { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => SystemTime::now() > expires_at,
            None => false,
        }
    }
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; called opportunistically by maintenance loops
    pub async fn cleanup_expired(&self) {
        let mut store = self.store.write().await;
        store.retain(|_, value| !value.is_expired());
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        let store = self.store.read().await;
        match store.get(key) {
            Some(value) if !value.is_expired() => Ok(Some(value.data.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StateError> {
        let mut store = self.store.write().await;
        store.insert(key.to_string(), StoredValue::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        let mut store = self.store.write().await;
        store.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StateError> {
        let store = self.store.read().await;

        // Glob patterns as the Valkey KEYS command understands them
        let regex_pattern = pattern
            .replace('.', "\\.")
            .replace('*', ".*")
            .replace('?', ".");

        let regex = regex::Regex::new(&format!("^{}$", regex_pattern))
            .map_err(|e| StateError::BackendError(format!("Invalid pattern: {}", e)))?;

        let mut keys: Vec<String> = store
            .iter()
            .filter(|(key, value)| !value.is_expired() && regex.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
    ) -> Result<bool, StateError> {
        let mut store = self.store.write().await;
        match store.get(key) {
            Some(existing) if !existing.is_expired() && existing.data == expected => {
                let ttl_remaining = existing
                    .expires_at
                    .and_then(|e| e.duration_since(SystemTime::now()).ok());
                store.insert(key.to_string(), StoredValue::new(new.to_vec(), ttl_remaining));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StateError> {
        let mut store = self.store.write().await;
        let current = match store.get(key) {
            Some(value) if !value.is_expired() => {
                let text = String::from_utf8_lossy(&value.data);
                text.parse::<i64>().map_err(|e| {
                    StateError::SerializationError(format!("not an integer: {}", e))
                })?
            }
            _ => 0,
        };
        let next = current + delta;
        store.insert(
            key.to_string(),
            StoredValue::new(next.to_string().into_bytes(), None),
        );
        Ok(next)
    }

    async fn ping(&self) -> Result<(), StateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryStateBackend::new();
        backend.set("k", b"v", None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let backend = MemoryStateBackend::new();
        backend
            .set("k", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_pattern_sorted() {
        let backend = MemoryStateBackend::new();
        backend.set("ippool:10.0.0.2", b"b", None).await.unwrap();
        backend.set("ippool:10.0.0.1", b"a", None).await.unwrap();
        backend.set("session:x", b"s", None).await.unwrap();

        let keys = backend.keys("ippool:*").await.unwrap();
        assert_eq!(keys, vec!["ippool:10.0.0.1", "ippool:10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let backend = MemoryStateBackend::new();
        backend.set("k", b"old", None).await.unwrap();

        assert!(backend.compare_and_swap("k", b"old", b"new").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"new".to_vec()));

        // Stale expectation loses
        assert!(!backend.compare_and_swap("k", b"old", b"x").await.unwrap());
        // Missing key loses
        assert!(!backend.compare_and_swap("nope", b"a", b"b").await.unwrap());
    }

    #[tokio::test]
    async fn test_cas_single_winner() {
        let backend = Arc::new(MemoryStateBackend::new());
        backend.set("k", b"free", None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let new = format!("leased-{}", i);
                backend
                    .compare_and_swap("k", b"free", new.as_bytes())
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_incr_by() {
        let backend = MemoryStateBackend::new();
        assert_eq!(backend.incr_by("c", 1).await.unwrap(), 1);
        assert_eq!(backend.incr_by("c", 2).await.unwrap(), 3);
        assert_eq!(backend.incr_by("c", -3).await.unwrap(), 0);
    }
}
