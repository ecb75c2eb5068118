//! Connection registry.
//!
//! Maps client public keys to their authorized [`ConnectionPolicy`]. The
//! registry is loaded at startup from a JSON document keyed by hex pubkey;
//! malformed entries are rejected at load time. A lookup for an unknown
//! client yields a lazily-created connection under the process-default
//! policy.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kvc_types::{Method, PairingLimits};
use serde::{Deserialize, Serialize};

use crate::connection::{ClientConnection, ConnectionPolicy};
use crate::error::RegistryError;
use crate::guard;

/// One entry of the persisted registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// The client's namespace (must end in `:`).
    pub namespace: String,
    /// Wire names of the allowed methods.
    #[serde(rename = "allowedMethods")]
    pub allowed_methods: Vec<String>,
    /// Limit vector.
    pub limits: PairingLimits,
    /// Optional human-readable label.
    #[serde(rename = "appName", default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Unix timestamp when the pairing was created.
    #[serde(default)]
    pub created: u64,
}

impl PolicyRecord {
    fn into_policy(self, pubkey: &str) -> Result<ConnectionPolicy, RegistryError> {
        if !guard::is_valid_namespace(&self.namespace) {
            return Err(RegistryError::InvalidEntry {
                pubkey: pubkey.to_string(),
                reason: format!("malformed namespace {:?}", self.namespace),
            });
        }

        let mut allowed_methods = HashSet::new();
        for name in &self.allowed_methods {
            let method = name
                .parse::<Method>()
                .map_err(|_| RegistryError::InvalidEntry {
                    pubkey: pubkey.to_string(),
                    reason: format!("unknown method {name:?}"),
                })?;
            allowed_methods.insert(method);
        }

        if self.limits.mps == 0 || self.limits.bps == 0 {
            return Err(RegistryError::InvalidEntry {
                pubkey: pubkey.to_string(),
                reason: "limits must be positive".to_string(),
            });
        }

        Ok(ConnectionPolicy {
            namespace: self.namespace,
            allowed_methods,
            limits: self.limits,
            app_name: self.app_name,
            created: self.created,
        })
    }

    fn from_policy(policy: &ConnectionPolicy) -> Self {
        let mut allowed_methods: Vec<String> = policy
            .allowed_methods
            .iter()
            .map(|m| m.as_str().to_string())
            .collect();
        allowed_methods.sort();
        Self {
            namespace: policy.namespace.clone(),
            allowed_methods,
            limits: policy.limits,
            app_name: policy.app_name.clone(),
            created: policy.created,
        }
    }
}

/// Pubkey → connection map with a default policy for unknown clients.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ClientConnection>>,
    default_policy: ConnectionPolicy,
    idempotency_window: Duration,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .field("default_namespace", &self.default_policy.namespace)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry with the given default policy.
    pub fn new(default_policy: ConnectionPolicy, idempotency_window: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            default_policy,
            idempotency_window,
        }
    }

    /// Load the registry from a JSON file.
    ///
    /// A missing file yields an empty registry; a present but malformed
    /// file or entry is fatal.
    pub fn load(
        path: &Path,
        default_policy: ConnectionPolicy,
        idempotency_window: Duration,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new(default_policy, idempotency_window);

        if !path.exists() {
            tracing::info!("No registry at {}, starting empty", path.display());
            return Ok(registry);
        }

        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let records: BTreeMap<String, PolicyRecord> =
            serde_json::from_str(&content).map_err(|e| RegistryError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;

        for (pubkey, record) in records {
            if pubkey.len() != 64 || hex::decode(&pubkey).is_err() {
                return Err(RegistryError::InvalidEntry {
                    pubkey: pubkey.clone(),
                    reason: "pubkey is not 32 bytes of hex".to_string(),
                });
            }
            let policy = record.into_policy(&pubkey)?;
            registry.install(&pubkey, policy);
        }

        tracing::info!(
            "Loaded {} connections from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Serialize the installed connections back to the registry document.
    pub fn to_records(&self) -> BTreeMap<String, PolicyRecord> {
        self.connections
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    PolicyRecord::from_policy(entry.value().policy()),
                )
            })
            .collect()
    }

    /// Persist the registry document to `path`.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let records = self.to_records();
        let json = serde_json::to_string_pretty(&records).map_err(|e| RegistryError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| RegistryError::Read {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Install (or replace) a connection under an explicit policy.
    pub fn install(&self, pubkey: &str, policy: ConnectionPolicy) {
        self.connections.insert(
            pubkey.to_string(),
            Arc::new(ClientConnection::new(
                pubkey,
                policy,
                self.idempotency_window,
            )),
        );
    }

    /// Resolve the connection for `pubkey`, creating one under the default
    /// policy on first contact.
    pub fn resolve(&self, pubkey: &str) -> Arc<ClientConnection> {
        self.connections
            .entry(pubkey.to_string())
            .or_insert_with(|| {
                tracing::debug!("New connection for {} under default policy", pubkey);
                Arc::new(ClientConnection::new(
                    pubkey,
                    self.default_policy.clone(),
                    self.idempotency_window,
                ))
            })
            .clone()
    }

    /// Number of installed connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether any connections are installed.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Iterate over installed connections (for sweeps).
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_policy() -> ConnectionPolicy {
        ConnectionPolicy::allow_all("kvc:", PairingLimits::default())
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(default_policy(), Duration::from_secs(60))
    }

    #[test]
    fn unknown_client_gets_default_policy() {
        let registry = registry();
        let conn = registry.resolve(&"ab".repeat(32));
        assert_eq!(conn.policy().namespace, "kvc:");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_is_stable_per_pubkey() {
        let registry = registry();
        let pubkey = "cd".repeat(32);
        let a = registry.resolve(&pubkey);
        let b = registry.resolve(&pubkey);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn installed_policy_wins_over_default() {
        let registry = registry();
        let pubkey = "ef".repeat(32);
        let mut policy = default_policy();
        policy.namespace = "appB:".to_string();
        registry.install(&pubkey, policy);

        let conn = registry.resolve(&pubkey);
        assert_eq!(conn.policy().namespace, "appB:");
    }

    #[test]
    fn record_roundtrip_preserves_policy() {
        let mut policy = default_policy();
        policy.app_name = Some("demo".to_string());
        policy.created = 1_700_000_000;

        let record = PolicyRecord::from_policy(&policy);
        let back = record.into_policy(&"ab".repeat(32)).unwrap();

        assert_eq!(back.namespace, policy.namespace);
        assert_eq!(back.allowed_methods, policy.allowed_methods);
        assert_eq!(back.limits, policy.limits);
        assert_eq!(back.app_name, policy.app_name);
        assert_eq!(back.created, policy.created);
    }

    #[test]
    fn malformed_namespace_rejected() {
        let record = PolicyRecord {
            namespace: "no-colon".to_string(),
            allowed_methods: vec!["get".to_string()],
            limits: PairingLimits::default(),
            app_name: None,
            created: 0,
        };
        assert!(matches!(
            record.into_policy("ab"),
            Err(RegistryError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn unknown_method_rejected() {
        let record = PolicyRecord {
            namespace: "appA:".to_string(),
            allowed_methods: vec!["flushall".to_string()],
            limits: PairingLimits::default(),
            app_name: None,
            created: 0,
        };
        assert!(matches!(
            record.into_policy("ab"),
            Err(RegistryError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn load_missing_file_yields_empty_registry() {
        let path = std::env::temp_dir().join("kvc-registry-missing.json");
        let _ = std::fs::remove_file(&path);
        let registry =
            ConnectionRegistry::load(&path, default_policy(), Duration::from_secs(60)).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn load_save_roundtrip() {
        let dir = std::env::temp_dir();
        let path = dir.join("kvc-registry-roundtrip.json");

        let registry = registry();
        let pubkey = "12".repeat(32);
        let mut policy = default_policy();
        policy.namespace = "appA:".to_string();
        policy.app_name = Some("demo".to_string());
        registry.install(&pubkey, policy);
        registry.save(&path).unwrap();

        let loaded =
            ConnectionRegistry::load(&path, default_policy(), Duration::from_secs(60)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.resolve(&pubkey).policy().namespace, "appA:");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_rejects_bad_pubkey() {
        let dir = std::env::temp_dir();
        let path = dir.join("kvc-registry-badkey.json");
        std::fs::write(
            &path,
            r#"{"not-hex": {"namespace": "appA:", "allowedMethods": ["get"],
                "limits": {"mps": 1, "bps": 1, "max_key": 1, "max_val": 1, "mget_max": 1}}}"#,
        )
        .unwrap();

        let result = ConnectionRegistry::load(&path, default_policy(), Duration::from_secs(60));
        assert!(matches!(result, Err(RegistryError::InvalidEntry { .. })));

        let _ = std::fs::remove_file(&path);
    }
}
