//! Per-client connection state.
//!
//! A connection binds a client public key to its authorized policy and the
//! mutable accounting that policy enforcement needs: the sliding
//! rate/byte windows and the idempotency cache. All mutable state sits
//! behind one `tokio` mutex so that counter increments, window purges, and
//! cache inserts are linearizable per client; distinct connections never
//! contend.

use std::collections::HashSet;
use std::time::Duration;

use kvc_types::{Method, PairingLimits};
use tokio::sync::{Mutex, MutexGuard};

use crate::budget::SlidingWindow;
use crate::idempotency::IdempotencyCache;

/// The authorized policy for one client public key.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    /// Mandatory key prefix for every operation.
    pub namespace: String,
    /// Methods the client may call.
    pub allowed_methods: HashSet<Method>,
    /// Limit vector.
    pub limits: PairingLimits,
    /// Optional human-readable label.
    pub app_name: Option<String>,
    /// Unix timestamp when the pairing was created.
    pub created: u64,
}

impl ConnectionPolicy {
    /// Build a policy allowing every method.
    pub fn allow_all(namespace: impl Into<String>, limits: PairingLimits) -> Self {
        Self {
            namespace: namespace.into(),
            allowed_methods: Method::ALL.into_iter().collect(),
            limits,
            app_name: None,
            created: 0,
        }
    }

    /// Whether `method` is on the allowlist.
    pub fn allows(&self, method: Method) -> bool {
        self.allowed_methods.contains(&method)
    }
}

/// Mutable accounting state, serialized under the connection mutex.
#[derive(Debug)]
pub struct ConnectionState {
    /// Sliding request/byte windows.
    pub window: SlidingWindow,
    /// Request-id → response cache.
    pub idempotency: IdempotencyCache,
}

/// One client connection: identity, policy, and guarded state.
#[derive(Debug)]
pub struct ClientConnection {
    pubkey: String,
    policy: ConnectionPolicy,
    state: Mutex<ConnectionState>,
}

impl ClientConnection {
    /// Create a connection for `pubkey` under `policy`.
    pub fn new(
        pubkey: impl Into<String>,
        policy: ConnectionPolicy,
        idempotency_window: Duration,
    ) -> Self {
        Self {
            pubkey: pubkey.into(),
            policy,
            state: Mutex::new(ConnectionState {
                window: SlidingWindow::new(),
                idempotency: IdempotencyCache::new(idempotency_window),
            }),
        }
    }

    /// The client's hex public key.
    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    /// The authorized policy.
    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    /// Acquire the per-connection state lock.
    ///
    /// Held across a whole dispatch so same-client requests are processed
    /// in arrival order.
    pub async fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().await
    }
}
