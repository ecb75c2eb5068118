//! Per-connection sliding-window rate and byte budgets.
//!
//! Each connection carries two rolling 60-second windows: one counting
//! accepted requests against `mps`, one summing accepted request+response
//! bytes against `bps`. Purging is lazy, on each check, so memory per
//! connection stays bounded by the window contents.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Length of the rolling accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window counters for one connection.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    requests: VecDeque<Instant>,
    bytes: VecDeque<(Instant, u64)>,
}

impl SlidingWindow {
    /// Create empty windows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the request-count budget at `now`.
    ///
    /// Purges entries older than the window; if fewer than `mps` requests
    /// remain, records `now` and accepts.
    pub fn check_rate(&mut self, mps: u32, now: Instant) -> bool {
        self.purge(now);
        if self.requests.len() >= mps as usize {
            return false;
        }
        self.requests.push_back(now);
        true
    }

    /// Check whether `n` more bytes fit the byte budget at `now`.
    ///
    /// Does not record anything; call [`consume_bytes`](Self::consume_bytes)
    /// once the operation is accepted.
    pub fn check_bytes(&mut self, n: u64, bps: u64, now: Instant) -> bool {
        self.purge(now);
        self.current_bytes() + n <= bps
    }

    /// Record `n` accepted bytes at `now`. Response bytes count too.
    pub fn consume_bytes(&mut self, n: u64, now: Instant) {
        self.bytes.push_back((now, n));
    }

    /// Sum of bytes currently inside the window (after the last purge).
    pub fn current_bytes(&self) -> u64 {
        self.bytes.iter().map(|(_, n)| n).sum()
    }

    /// Number of requests currently inside the window (after the last purge).
    pub fn current_requests(&self) -> usize {
        self.requests.len()
    }

    fn purge(&mut self, now: Instant) {
        let cutoff = now.checked_sub(WINDOW);
        let Some(cutoff) = cutoff else {
            return; // Process younger than the window; nothing can be stale.
        };
        while self.requests.front().is_some_and(|&t| t < cutoff) {
            self.requests.pop_front();
        }
        while self.bytes.front().is_some_and(|&(t, _)| t < cutoff) {
            self.bytes.pop_front();
        }
    }
}
