//! Append-only audit capture.
//!
//! Every request whose envelope passed gets one redacted record, pushed to
//! the head of a bounded backend list that lives under a reserved key
//! outside client namespaces. Records never contain raw keys or raw
//! values: keys are reduced to a short non-cryptographic hash, values to
//! their decoded length, and client pubkeys to a first-4/last-4 form.
//! Appending is best-effort and never blocks request processing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::KvStore;

/// Suffix appended to the server namespace to form the audit list key.
pub const AUDIT_LIST_SUFFIX: &str = "__audit";

/// Maximum retained audit records (head-push, tail-trim).
pub const AUDIT_MAX_ENTRIES: usize = 10_000;

/// Outcome of an audited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// The request produced a success response.
    Ok,
    /// The request produced an error response.
    Error,
}

/// One redacted per-request record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Wire name of the requested method (or `unknown`).
    pub method: String,
    /// Short hash of the raw key, if the method named one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_hash: Option<String>,
    /// Decoded value length in bytes, for writes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value_size: Option<u64>,
    /// Outcome.
    pub status: AuditStatus,
    /// Error code on failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<String>,
    /// Wall-clock processing time in milliseconds.
    pub latency_ms: u64,
    /// Redacted client pubkey (`abcd…wxyz`).
    pub client: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

/// First 8 characters of the base64 of the raw key.
///
/// Correlation aid, not a cryptographic commitment.
pub fn key_hash(raw_key: &str) -> String {
    let encoded = BASE64.encode(raw_key.as_bytes());
    encoded.chars().take(8).collect()
}

/// Redact a hex pubkey to its first and last four characters.
pub fn redact_pubkey(pubkey: &str) -> String {
    if pubkey.len() <= 8 {
        return pubkey.to_string();
    }
    format!("{}…{}", &pubkey[..4], &pubkey[pubkey.len() - 4..])
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Aggregate statistics over a window of audit records.
#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    /// Records inside the window.
    pub total: u64,
    /// Record counts by method.
    pub by_method: BTreeMap<String, u64>,
    /// Record counts by error code.
    pub by_error: BTreeMap<String, u64>,
    /// Fraction of records with `ok` status (1.0 when empty).
    pub success_rate: f64,
    /// Mean latency in milliseconds (0.0 when empty).
    pub mean_latency_ms: f64,
}

/// Append-only audit log backed by a bounded backend list.
pub struct AuditLog {
    store: Arc<dyn KvStore>,
    list_key: String,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("list_key", &self.list_key)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Create an audit log for the server namespace.
    pub fn new(store: Arc<dyn KvStore>, server_namespace: &str) -> Self {
        Self {
            store,
            list_key: format!("{server_namespace}{AUDIT_LIST_SUFFIX}"),
        }
    }

    /// The reserved backend key the list lives under.
    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    /// Append a record, best-effort.
    ///
    /// Backend degradation is logged locally and otherwise ignored so a
    /// slow audit store cannot stall request processing.
    pub async fn append(&self, record: &AuditRecord) {
        let json = match serde_json::to_vec(record) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize audit record: {e}");
                return;
            }
        };
        if let Err(e) = self
            .store
            .list_push_trim(&self.list_key, &json, AUDIT_MAX_ENTRIES)
            .await
        {
            tracing::warn!("Audit append skipped (backend degraded): {e}");
        }
    }

    /// Aggregate the records of the last `window_ms` milliseconds.
    pub async fn stats(&self, window_ms: u64) -> Result<AuditStats, StoreError> {
        let cutoff = now_millis().saturating_sub(window_ms);
        let raw = self
            .store
            .list_range(&self.list_key, AUDIT_MAX_ENTRIES)
            .await?;

        let mut total = 0u64;
        let mut ok = 0u64;
        let mut latency_sum = 0u64;
        let mut by_method: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_error: BTreeMap<String, u64> = BTreeMap::new();

        for bytes in raw {
            let Ok(record) = serde_json::from_slice::<AuditRecord>(&bytes) else {
                continue; // tolerate foreign writers
            };
            if record.timestamp < cutoff {
                // Records are newest-first; everything past this is older.
                break;
            }
            total += 1;
            latency_sum += record.latency_ms;
            *by_method.entry(record.method).or_default() += 1;
            if record.status == AuditStatus::Ok {
                ok += 1;
            }
            if let Some(code) = record.error_code {
                *by_error.entry(code).or_default() += 1;
            }
        }

        Ok(AuditStats {
            total,
            by_method,
            by_error,
            success_rate: if total == 0 {
                1.0
            } else {
                ok as f64 / total as f64
            },
            mean_latency_ms: if total == 0 {
                0.0
            } else {
                latency_sum as f64 / total as f64
            },
        })
    }
}
