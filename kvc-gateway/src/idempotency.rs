//! Per-connection idempotency cache.
//!
//! Maps a client-chosen request id to the serialized bytes of the response
//! it produced. Within the window, a duplicate request id is answered with
//! the cached bytes verbatim, so replays are byte-identical even if backend
//! state has since changed. Lookups evict on the miss path; a background
//! sweep (see [`crate::server`]) evicts the rest.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default idempotency window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Request-id → serialized-response cache with a time window.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: HashMap<String, (Vec<u8>, Instant)>,
    window: Duration,
}

impl IdempotencyCache {
    /// Create a cache with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    /// Look up the cached response for `request_id` at `now`.
    ///
    /// An expired entry is evicted and reported as a miss.
    pub fn lookup(&mut self, request_id: &str, now: Instant) -> Option<Vec<u8>> {
        if let Some((bytes, inserted_at)) = self.entries.get(request_id) {
            if now.duration_since(*inserted_at) < self.window {
                return Some(bytes.clone());
            }
        } else {
            return None;
        }
        self.entries.remove(request_id);
        None
    }

    /// Cache the serialized response for `request_id`.
    pub fn insert(&mut self, request_id: impl Into<String>, response: Vec<u8>, now: Instant) {
        self.entries.insert(request_id.into(), (response, now));
    }

    /// Evict every expired entry. Returns the number evicted.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, inserted_at)| now.duration_since(*inserted_at) < window);
        before - self.entries.len()
    }

    /// Number of live entries (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
