//! In-memory store for tests.
//!
//! Mirrors the backend semantics the router depends on (TTL expiry,
//! `-2`/`-1` TTL answers, head-push list trimming) and can simulate an
//! outage via [`MemoryStore::set_offline`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::KvStore;
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Test double for [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    offline: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage: every call fails until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    /// Read the live value for `key`, dropping it if expired.
    fn live(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        entries.remove(key);
        None
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<(), StoreError> {
        self.check_online()?;
        let entry = Entry {
            value: value.to_vec(),
            expires_at: ttl.map(|secs| Instant::now() + Duration::from_secs(secs)),
        };
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        self.check_online()?;
        let existed = self.live(key).is_some();
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .remove(key);
        Ok(u64::from(existed))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(self.live(key).is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.check_online()?;
        Ok(keys.iter().map(|key| self.live(key)).collect())
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, StoreError> {
        self.check_online()?;
        if self.live(key).is_none() {
            return Ok(false);
        }
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let Some(entry) = entries.get(key) else {
            return Ok(-2);
        };
        if entry.is_expired(now) {
            entries.remove(key);
            return Ok(-2);
        }
        Ok(match entry.expires_at {
            Some(deadline) => deadline.duration_since(now).as_secs() as i64,
            None => -1,
        })
    }

    async fn list_push_trim(
        &self,
        key: &str,
        value: &[u8],
        max_len: usize,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut lists = self.lists.lock().expect("store mutex poisoned");
        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value.to_vec());
        list.truncate(max_len);
        Ok(())
    }

    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>, StoreError> {
        self.check_online()?;
        let lists = self.lists.lock().expect("store mutex poisoned");
        Ok(lists
            .get(key)
            .map(|list| list.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn is_ready(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del_roundtrip() {
        let store = MemoryStore::new();
        store.set("a:k", b"v", None).await.unwrap();
        assert_eq!(store.get("a:k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.exists("a:k").await.unwrap());

        assert_eq!(store.del("a:k").await.unwrap(), 1);
        assert_eq!(store.del("a:k").await.unwrap(), 0);
        assert_eq!(store.get("a:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_semantics() {
        let store = MemoryStore::new();
        assert_eq!(store.ttl("missing").await.unwrap(), -2);

        store.set("a:k", b"v", None).await.unwrap();
        assert_eq!(store.ttl("a:k").await.unwrap(), -1);

        store.set("a:t", b"v", Some(60)).await.unwrap();
        let remaining = store.ttl("a:t").await.unwrap();
        assert!((59..=60).contains(&remaining));
    }

    #[tokio::test]
    async fn expire_updates_deadline() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", 10).await.unwrap());

        store.set("a:k", b"v", None).await.unwrap();
        assert!(store.expire("a:k", 30).await.unwrap());
        let remaining = store.ttl("a:k").await.unwrap();
        assert!((29..=30).contains(&remaining));
    }

    #[tokio::test]
    async fn expired_entry_disappears() {
        let store = MemoryStore::new();
        store.set("a:k", b"v", Some(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get("a:k").await.unwrap(), None);
        assert!(!store.exists("a:k").await.unwrap());
        assert_eq!(store.ttl("a:k").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn mget_preserves_order() {
        let store = MemoryStore::new();
        store.set("a:1", b"one", None).await.unwrap();
        store.set("a:3", b"three", None).await.unwrap();

        let values = store
            .mget(&["a:1".into(), "a:2".into(), "a:3".into()])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some(b"one".to_vec()), None, Some(b"three".to_vec())]
        );
    }

    #[tokio::test]
    async fn list_push_trims_at_bound() {
        let store = MemoryStore::new();
        for i in 0..5u8 {
            store.list_push_trim("a:log", &[i], 3).await.unwrap();
        }
        let entries = store.list_range("a:log", 10).await.unwrap();
        // Head-push: most recent first, trimmed to 3.
        assert_eq!(entries, vec![vec![4], vec![3], vec![2]]);
    }

    #[tokio::test]
    async fn offline_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(store.get("a:k").await.is_err());
        assert!(store.set("a:k", b"v", None).await.is_err());
        assert!(!store.is_ready().await);

        store.set_offline(false);
        assert!(store.is_ready().await);
        assert!(store.get("a:k").await.is_ok());
    }
}
