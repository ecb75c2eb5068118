//! Redis-backed store.
//!
//! Thin adapter over the `redis` crate's tokio connection manager. The
//! manager multiplexes one connection across tasks and reconnects on its
//! own; on top of that, each call retries transient failures a few times
//! with a small backoff before surfacing an error to the router.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::KvStore;
use crate::error::StoreError;

/// In-call retry attempts for transient backend failures.
const RETRIES: u32 = 3;

/// Base delay between retries; grows linearly per attempt.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Production [`KvStore`] over a Redis-compatible backend.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the backend at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { manager })
    }

    async fn retry<T, Fut>(
        &self,
        mut op: impl FnMut(ConnectionManager) -> Fut,
    ) -> Result<T, StoreError>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=RETRIES {
            match op(self.manager.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!("Backend call failed (attempt {attempt}/{RETRIES}): {e}");
                    last_error = Some(e);
                    if attempt < RETRIES {
                        tokio::time::sleep(RETRY_DELAY * attempt).await;
                    }
                }
            }
        }
        Err(StoreError::Unavailable(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            async move { conn.get::<_, Option<Vec<u8>>>(key).await }
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<(), StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            let value = value.to_vec();
            async move {
                match ttl {
                    Some(secs) => conn.set_ex::<_, _, ()>(key, value, secs).await,
                    None => conn.set::<_, _, ()>(key, value).await,
                }
            }
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            async move { conn.del::<_, u64>(key).await }
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            async move { conn.exists::<_, bool>(key).await }
        })
        .await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.retry(|mut conn| {
            let keys = keys.to_vec();
            async move {
                // Explicit MGET so a single key still comes back as a list.
                redis::cmd("MGET")
                    .arg(&keys)
                    .query_async::<Vec<Option<Vec<u8>>>>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            async move { conn.expire::<_, bool>(key, ttl as i64).await }
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            async move { conn.ttl::<_, i64>(key).await }
        })
        .await
    }

    async fn list_push_trim(
        &self,
        key: &str,
        value: &[u8],
        max_len: usize,
    ) -> Result<(), StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            let value = value.to_vec();
            async move {
                redis::pipe()
                    .atomic()
                    .lpush(&key, value)
                    .ignore()
                    .ltrim(&key, 0, max_len as isize - 1)
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>, StoreError> {
        self.retry(|mut conn| {
            let key = key.to_string();
            async move {
                conn.lrange::<_, Vec<Vec<u8>>>(key, 0, count as isize - 1)
                    .await
            }
        })
        .await
    }

    async fn is_ready(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
