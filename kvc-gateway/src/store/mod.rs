//! Backend key-value storage.
//!
//! The gateway talks to its Redis-compatible backend through the
//! [`KvStore`] trait: the eight client-visible primitives plus the list
//! operations the audit log needs. All keys crossing this boundary are
//! fully qualified (namespace-prefixed); values are raw bytes so other
//! backend clients see them plainly.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;

use crate::error::StoreError;

/// Backend storage operations.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, optionally with a TTL in seconds.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<(), StoreError>;

    /// Delete a key. Returns the number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> Result<u64, StoreError>;

    /// Whether the key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Read several values in one round-trip, preserving order.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    /// Set a TTL on an existing key. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, StoreError>;

    /// Remaining TTL in seconds: `-2` if the key is missing, `-1` if it
    /// has no expiry.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    /// Push a value to the head of a list and trim it to `max_len`.
    async fn list_push_trim(
        &self,
        key: &str,
        value: &[u8],
        max_len: usize,
    ) -> Result<(), StoreError>;

    /// Read up to `count` values from the head of a list.
    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Whether the backend currently answers health probes.
    async fn is_ready(&self) -> bool;
}
