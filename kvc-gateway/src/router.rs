//! Protocol router.
//!
//! One router instance serves all connections. For each decrypted request
//! it runs the dispatch pipeline (idempotency lookup, method allowlist,
//! rate and byte budgets, parameter validation, namespace resolution,
//! backend dispatch) and produces exactly one serialized response,
//! fail-fast on the first error. Out of band it emits a redacted audit
//! record for every request whose envelope passed.
//!
//! Backend error messages are never surfaced verbatim; they are mapped to
//! `INTERNAL` and logged here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use serde_json::{json, Value};

use kvc_types::{ErrorCode, Method, Request, Response};

use crate::audit::{self, AuditLog, AuditRecord, AuditStatus};
use crate::connection::{ClientConnection, ConnectionState};
use crate::guard::NamespaceGuard;
use crate::store::KvStore;
use crate::validate::{self, Invalid};

/// Routes decrypted requests to the backend under policy.
pub struct Router {
    store: Arc<dyn KvStore>,
    audit: Arc<AuditLog>,
    /// `(v2, v1)` encryption capability flags reported by `get_info`.
    encryption: (bool, bool),
    /// Namespace → guard, shared across same-namespace connections.
    guards: DashMap<String, Arc<NamespaceGuard>>,
    request_timeout: Duration,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("guards", &self.guards.len())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// What one dispatch produced, before serialization.
struct Dispatched {
    response: Response,
    method: String,
    key_hash: Option<String>,
    value_size: Option<u64>,
    /// Rate-limit rejections are not memoized: the budget outcome depends
    /// on the window, not the request, and a retry must be re-evaluated.
    cacheable: bool,
}

impl Router {
    /// Create a router over the given store and audit log.
    pub fn new(
        store: Arc<dyn KvStore>,
        audit: Arc<AuditLog>,
        encryption: (bool, bool),
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            encryption,
            guards: DashMap::new(),
            request_timeout,
        }
    }

    /// Process one decrypted request payload for `conn`.
    ///
    /// Returns the serialized response to encrypt and publish, or `None`
    /// when the payload is unrecoverable and must be dropped.
    pub async fn handle(&self, conn: &ClientConnection, raw: &[u8]) -> Option<Vec<u8>> {
        let started = Instant::now();

        let request: Request = match serde_json::from_slice(raw) {
            Ok(request) => request,
            Err(e) => return self.handle_unparseable(conn, raw, e, started),
        };

        let mut state = conn.lock_state().await;

        // Idempotency: a duplicate id is answered with the cached bytes
        // verbatim, before any policy accounting.
        if let Some(cached) = state.idempotency.lookup(&request.id, Instant::now()) {
            drop(state);
            tracing::debug!("Replaying cached response for id {:?}", request.id);
            self.audit_replay(conn, &request, &cached, started);
            return Some(cached);
        }

        let dispatched = self.dispatch(conn, &mut state, &request, raw.len()).await;

        let bytes = match serde_json::to_vec(&dispatched.response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to serialize response: {e}");
                return None;
            }
        };

        if dispatched.cacheable {
            let now = Instant::now();
            state
                .idempotency
                .insert(request.id.clone(), bytes.clone(), now);
            // Response bytes count against the byte budget too.
            state.window.consume_bytes(bytes.len() as u64, now);
        }
        drop(state);

        self.emit_audit(conn, &dispatched, started);
        Some(bytes)
    }

    /// Structural parse failure: answer `INTERNAL` if an id is
    /// recoverable, otherwise drop.
    fn handle_unparseable(
        &self,
        conn: &ClientConnection,
        raw: &[u8],
        error: serde_json::Error,
        started: Instant,
    ) -> Option<Vec<u8>> {
        tracing::debug!("Unparseable request from {}: {error}", conn.pubkey());
        let id = serde_json::from_slice::<Value>(raw)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string))?;

        let response = Response::fail(id, ErrorCode::Internal, "malformed request");
        let bytes = serde_json::to_vec(&response).ok()?;
        self.emit_audit(
            conn,
            &Dispatched {
                response,
                method: "unknown".to_string(),
                key_hash: None,
                value_size: None,
                cacheable: false,
            },
            started,
        );
        Some(bytes)
    }

    async fn dispatch(
        &self,
        conn: &ClientConnection,
        state: &mut ConnectionState,
        request: &Request,
        request_size: usize,
    ) -> Dispatched {
        let policy = conn.policy();
        let fail = |code: ErrorCode, message: &str, cacheable: bool| Dispatched {
            response: Response::fail(request.id.clone(), code, message),
            method: request.method.clone(),
            key_hash: None,
            value_size: None,
            cacheable,
        };

        // The allowlist is a subset of the closed method set, so a method
        // string outside that set fails the same check as one off the list.
        let method = match request.method.parse::<Method>() {
            Ok(method) if policy.allows(method) => method,
            _ => return fail(ErrorCode::Restricted, "method not allowed", true),
        };

        let now = Instant::now();
        if !state.window.check_rate(policy.limits.mps, now) {
            tracing::debug!("Rate limit hit for {}", conn.pubkey());
            return fail(ErrorCode::RateLimited, "request budget exhausted", false);
        }
        if !state
            .window
            .check_bytes(request_size as u64, policy.limits.bps, now)
        {
            tracing::debug!("Byte budget hit for {}", conn.pubkey());
            return fail(ErrorCode::RateLimited, "byte budget exhausted", false);
        }
        state.window.consume_bytes(request_size as u64, now);

        let (result, key_hash, value_size) = match self.run_method(policy, request, method).await {
            Ok(ok) => ok,
            Err(invalid) => {
                return Dispatched {
                    response: Response::fail(request.id.clone(), invalid.code, invalid.message),
                    method: request.method.clone(),
                    key_hash: None,
                    value_size: None,
                    cacheable: true,
                }
            }
        };

        Dispatched {
            response: Response::ok(request.id.clone(), result),
            method: request.method.clone(),
            key_hash,
            value_size,
            cacheable: true,
        }
    }

    /// Validate parameters, resolve namespaces, and run the backend
    /// operation for one method.
    async fn run_method(
        &self,
        policy: &crate::connection::ConnectionPolicy,
        request: &Request,
        method: Method,
    ) -> Result<(Value, Option<String>, Option<u64>), Invalid> {
        let limits = &policy.limits;
        let guard = self.guard_for(&policy.namespace);
        let params = &request.params;

        match method {
            Method::GetInfo => {
                let mut methods: Vec<&str> =
                    policy.allowed_methods.iter().map(Method::as_str).collect();
                methods.sort_unstable();
                let info = json!({
                    "methods": methods,
                    "ns": policy.namespace,
                    "limits": {
                        "mps": limits.mps,
                        "bps": limits.bps,
                        "max_key": limits.max_key,
                        "max_val": limits.max_val,
                        "mget_max": limits.mget_max,
                    },
                    "encryption": { "v2": self.encryption.0, "v1": self.encryption.1 },
                });
                Ok((info, None, None))
            }

            Method::Get => {
                let key = validate::key_param(params, limits.max_key)?;
                let qualified = resolve(&guard, &key)?;
                let value = self.backend(self.store.get(&qualified)).await?;
                let result = json!({ "value": value.map(|v| BASE64.encode(v)) });
                Ok((result, Some(audit::key_hash(&key)), None))
            }

            Method::Set => {
                let key = validate::key_param(params, limits.max_key)?;
                let value = validate::value_param(params, limits.max_val)?;
                let ttl = validate::ttl_param(params, false, ErrorCode::InvalidValue)?;
                let qualified = resolve(&guard, &key)?;
                let size = value.len() as u64;
                self.backend(self.store.set(&qualified, &value, ttl)).await?;
                Ok((
                    json!({ "ok": true }),
                    Some(audit::key_hash(&key)),
                    Some(size),
                ))
            }

            Method::Del => {
                let key = validate::key_param(params, limits.max_key)?;
                let qualified = resolve(&guard, &key)?;
                let deleted = self.backend(self.store.del(&qualified)).await?;
                Ok((
                    json!({ "deleted": deleted }),
                    Some(audit::key_hash(&key)),
                    None,
                ))
            }

            Method::Exists => {
                let key = validate::key_param(params, limits.max_key)?;
                let qualified = resolve(&guard, &key)?;
                let exists = self.backend(self.store.exists(&qualified)).await?;
                Ok((
                    json!({ "exists": exists }),
                    Some(audit::key_hash(&key)),
                    None,
                ))
            }

            Method::Mget => {
                let keys = validate::keys_param(params, limits.mget_max, limits.max_key)?;
                let qualified = keys
                    .iter()
                    .map(|key| resolve(&guard, key))
                    .collect::<Result<Vec<_>, _>>()?;
                let values = self.backend(self.store.mget(&qualified)).await?;
                let encoded: Vec<Value> = values
                    .into_iter()
                    .map(|v| v.map(|bytes| Value::String(BASE64.encode(bytes))).unwrap_or(Value::Null))
                    .collect();
                Ok((json!({ "values": encoded }), None, None))
            }

            Method::Expire => {
                let key = validate::key_param(params, limits.max_key)?;
                let ttl = validate::ttl_param(params, true, ErrorCode::InvalidKey)?
                    .expect("required ttl is present");
                let qualified = resolve(&guard, &key)?;
                let ok = self.backend(self.store.expire(&qualified, ttl)).await?;
                Ok((json!({ "ok": ok }), Some(audit::key_hash(&key)), None))
            }

            Method::Ttl => {
                let key = validate::key_param(params, limits.max_key)?;
                let qualified = resolve(&guard, &key)?;
                let ttl = self.backend(self.store.ttl(&qualified)).await?;
                Ok((json!({ "ttl": ttl }), Some(audit::key_hash(&key)), None))
            }
        }
    }

    /// Run a backend call under the per-request deadline.
    async fn backend<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, crate::error::StoreError>>,
    ) -> Result<T, Invalid> {
        match tokio::time::timeout(self.request_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!("Backend operation failed: {e}");
                Err(Invalid::new(ErrorCode::Internal, "backend failure"))
            }
            Err(_) => {
                tracing::warn!("Backend operation exceeded {:?}", self.request_timeout);
                Err(Invalid::new(ErrorCode::Internal, "backend timeout"))
            }
        }
    }

    fn guard_for(&self, namespace: &str) -> Arc<NamespaceGuard> {
        self.guards
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(NamespaceGuard::new(namespace)))
            .clone()
    }

    /// Drop router caches (shared guards); called on shutdown.
    pub fn clear_caches(&self) {
        self.guards.clear();
    }

    fn emit_audit(&self, conn: &ClientConnection, dispatched: &Dispatched, started: Instant) {
        let record = AuditRecord {
            method: dispatched.method.clone(),
            key_hash: dispatched.key_hash.clone(),
            value_size: dispatched.value_size,
            status: if dispatched.response.is_ok() {
                AuditStatus::Ok
            } else {
                AuditStatus::Error
            },
            error_code: dispatched
                .response
                .error
                .as_ref()
                .map(|e| e.code.as_str().to_string()),
            latency_ms: started.elapsed().as_millis() as u64,
            client: audit::redact_pubkey(conn.pubkey()),
            timestamp: audit::now_millis(),
        };
        let audit = self.audit.clone();
        // Fire and forget so a degraded audit backend never blocks the
        // response path.
        tokio::spawn(async move { audit.append(&record).await });
    }

    fn audit_replay(
        &self,
        conn: &ClientConnection,
        request: &Request,
        cached: &[u8],
        started: Instant,
    ) {
        let status = serde_json::from_slice::<Response>(cached)
            .map(|r| if r.is_ok() { AuditStatus::Ok } else { AuditStatus::Error })
            .unwrap_or(AuditStatus::Ok);
        let key_hash = request
            .params
            .get("key")
            .and_then(Value::as_str)
            .map(audit::key_hash);
        let record = AuditRecord {
            method: request.method.clone(),
            key_hash,
            value_size: None,
            status,
            error_code: None,
            latency_ms: started.elapsed().as_millis() as u64,
            client: audit::redact_pubkey(conn.pubkey()),
            timestamp: audit::now_millis(),
        };
        let audit = self.audit.clone();
        tokio::spawn(async move { audit.append(&record).await });
    }
}

fn resolve(guard: &NamespaceGuard, key: &str) -> Result<String, Invalid> {
    guard
        .resolve(key)
        .map_err(|violation| Invalid::new(ErrorCode::Restricted, violation.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionPolicy;
    use crate::store::MemoryStore;
    use kvc_types::PairingLimits;
    use serde_json::Map;

    fn setup() -> (Router, Arc<MemoryStore>, ClientConnection) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone(), "kvc:"));
        let router = Router::new(
            store.clone() as Arc<dyn KvStore>,
            audit,
            (true, true),
            Duration::from_secs(15),
        );
        let conn = ClientConnection::new(
            "ab".repeat(32),
            ConnectionPolicy::allow_all("appA:", PairingLimits::default()),
            Duration::from_secs(60),
        );
        (router, store, conn)
    }

    fn request(method: &str, params: Value, id: &str) -> Vec<u8> {
        let params: Map<String, Value> = params.as_object().cloned().unwrap_or_default();
        serde_json::to_vec(&Request {
            method: method.to_string(),
            params,
            id: id.to_string(),
        })
        .unwrap()
    }

    async fn roundtrip(router: &Router, conn: &ClientConnection, raw: &[u8]) -> Response {
        let bytes = router.handle(conn, raw).await.expect("response expected");
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_base64() {
        let (router, store, conn) = setup();

        let set = request("set", json!({"key": "user:123", "value": "SGVsbG8="}), "r-1");
        let resp = roundtrip(&router, &conn, &set).await;
        assert_eq!(resp.result, Some(json!({"ok": true})));

        // Backend holds raw bytes under the qualified key.
        assert_eq!(
            store.get("appA:user:123").await.unwrap(),
            Some(b"Hello".to_vec())
        );

        let get = request("get", json!({"key": "user:123"}), "r-2");
        let resp = roundtrip(&router, &conn, &get).await;
        assert_eq!(resp.result, Some(json!({"value": "SGVsbG8="})));
    }

    #[tokio::test]
    async fn namespace_escape_gets_restricted_without_backend_call() {
        let (router, store, conn) = setup();

        let set = request("set", json!({"key": "../etc/passwd", "value": "eA=="}), "r-1");
        let resp = roundtrip(&router, &conn, &set).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::Restricted);

        // No mutation happened anywhere.
        assert_eq!(store.mget(&["appA:../etc/passwd".into()]).await.unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn foreign_namespace_restricted() {
        let (router, _, conn) = setup();
        let get = request("get", json!({"key": "appB:user"}), "r-1");
        let resp = roundtrip(&router, &conn, &get).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::Restricted);
    }

    #[tokio::test]
    async fn unknown_method_restricted() {
        let (router, _, conn) = setup();
        let resp = roundtrip(&router, &conn, &request("flushall", json!({}), "r-1")).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::Restricted);
    }

    #[tokio::test]
    async fn disallowed_method_restricted() {
        let (router, _, _) = setup();
        let mut policy = ConnectionPolicy::allow_all("appA:", PairingLimits::default());
        policy.allowed_methods = [Method::Get].into_iter().collect();
        let conn = ClientConnection::new("cd".repeat(32), policy, Duration::from_secs(60));

        let resp = roundtrip(
            &router,
            &conn,
            &request("set", json!({"key": "k", "value": "eA=="}), "r-1"),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::Restricted);
    }

    #[tokio::test]
    async fn replay_returns_byte_identical_response() {
        let (router, _, conn) = setup();
        let set = request("set", json!({"key": "a", "value": "eA=="}), "r-7");

        let first = router.handle(&conn, &set).await.unwrap();
        let second = router.handle(&conn, &set).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rate_limit_rejects_after_mps() {
        let (router, _, _) = setup();
        let mut policy = ConnectionPolicy::allow_all("appA:", PairingLimits::default());
        policy.limits.mps = 3;
        let conn = ClientConnection::new("cd".repeat(32), policy, Duration::from_secs(60));

        for i in 0..3 {
            let get = request("get", json!({"key": "k"}), &format!("r-{i}"));
            let resp = roundtrip(&router, &conn, &get).await;
            assert!(resp.is_ok(), "request {i} should pass");
        }
        let get = request("get", json!({"key": "k"}), "r-last");
        let resp = roundtrip(&router, &conn, &get).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn byte_budget_rejects_large_traffic() {
        let (router, _, _) = setup();
        let mut policy = ConnectionPolicy::allow_all("appA:", PairingLimits::default());
        policy.limits.bps = 120; // fits roughly one small request
        let conn = ClientConnection::new("cd".repeat(32), policy, Duration::from_secs(60));

        let first = request("get", json!({"key": "k"}), "r-1");
        let resp = roundtrip(&router, &conn, &first).await;
        assert!(resp.is_ok());

        let second = request("get", json!({"key": "k"}), "r-2");
        let resp = roundtrip(&router, &conn, &second).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn rate_limited_response_is_not_memoized() {
        let (router, _, _) = setup();
        let mut policy = ConnectionPolicy::allow_all("appA:", PairingLimits::default());
        policy.limits.mps = 1;
        let conn = ClientConnection::new("cd".repeat(32), policy, Duration::from_secs(60));

        let ok = roundtrip(&router, &conn, &request("get", json!({"key": "k"}), "r-1")).await;
        assert!(ok.is_ok());
        let limited = roundtrip(&router, &conn, &request("get", json!({"key": "k"}), "r-2")).await;
        assert_eq!(limited.error.unwrap().code, ErrorCode::RateLimited);

        // The same id retried is evaluated afresh, not served from cache.
        {
            let mut state = conn.lock_state().await;
            assert!(state.idempotency.lookup("r-2", Instant::now()).is_none());
        }
    }

    #[tokio::test]
    async fn mget_matches_per_key_get() {
        let (router, _, conn) = setup();
        roundtrip(
            &router,
            &conn,
            &request("set", json!({"key": "user:123", "value": "SGVsbG8="}), "r-1"),
        )
        .await;

        let mget = request("mget", json!({"keys": ["user:123", "missing"]}), "r-2");
        let resp = roundtrip(&router, &conn, &mget).await;
        assert_eq!(resp.result, Some(json!({"values": ["SGVsbG8=", null]})));
    }

    #[tokio::test]
    async fn mget_over_limit_payload_too_large() {
        let (router, _, _) = setup();
        let mut policy = ConnectionPolicy::allow_all("appA:", PairingLimits::default());
        policy.limits.mget_max = 2;
        let conn = ClientConnection::new("cd".repeat(32), policy, Duration::from_secs(60));

        let mget = request("mget", json!({"keys": ["a", "b", "c"]}), "r-1");
        let resp = roundtrip(&router, &conn, &mget).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::PayloadTooLarge);
    }

    #[tokio::test]
    async fn del_twice_reports_zero_second_time() {
        let (router, _, conn) = setup();
        roundtrip(
            &router,
            &conn,
            &request("set", json!({"key": "k", "value": "eA=="}), "r-1"),
        )
        .await;

        let del1 = roundtrip(&router, &conn, &request("del", json!({"key": "k"}), "r-2")).await;
        assert_eq!(del1.result, Some(json!({"deleted": 1})));
        let del2 = roundtrip(&router, &conn, &request("del", json!({"key": "k"}), "r-3")).await;
        assert_eq!(del2.result, Some(json!({"deleted": 0})));
    }

    #[tokio::test]
    async fn ttl_lifecycle() {
        let (router, _, conn) = setup();
        roundtrip(
            &router,
            &conn,
            &request("set", json!({"key": "k", "value": "eA==", "ttl": 60}), "r-1"),
        )
        .await;

        let ttl = roundtrip(&router, &conn, &request("ttl", json!({"key": "k"}), "r-2")).await;
        let remaining = ttl.result.unwrap()["ttl"].as_i64().unwrap();
        assert!((59..=60).contains(&remaining));

        let expire =
            roundtrip(&router, &conn, &request("expire", json!({"key": "k", "ttl": 30}), "r-3"))
                .await;
        assert_eq!(expire.result, Some(json!({"ok": true})));

        let ttl = roundtrip(&router, &conn, &request("ttl", json!({"key": "k"}), "r-4")).await;
        let remaining = ttl.result.unwrap()["ttl"].as_i64().unwrap();
        assert!((29..=30).contains(&remaining));

        let missing = roundtrip(&router, &conn, &request("ttl", json!({"key": "nope"}), "r-5")).await;
        assert_eq!(missing.result, Some(json!({"ttl": -2})));
    }

    #[tokio::test]
    async fn get_info_reports_policy_and_encryption() {
        let (router, _, conn) = setup();
        let resp = roundtrip(&router, &conn, &request("get_info", json!({}), "r-1")).await;
        let info = resp.result.unwrap();

        assert_eq!(info["ns"], "appA:");
        assert_eq!(info["limits"]["mps"], 60);
        assert_eq!(info["encryption"], json!({"v2": true, "v1": true}));
        assert_eq!(info["methods"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn backend_failure_maps_to_internal() {
        let (router, store, conn) = setup();
        store.set_offline(true);

        let resp = roundtrip(&router, &conn, &request("get", json!({"key": "k"}), "r-1")).await;
        let error = resp.error.unwrap();
        assert_eq!(error.code, ErrorCode::Internal);
        // The backend's own message never leaks.
        assert!(!error.message.contains("simulated outage"));
    }

    #[tokio::test]
    async fn unparseable_with_id_yields_internal() {
        let (router, _, conn) = setup();
        let raw = br#"{"method": 42, "id": "r-9"}"#;
        let resp = roundtrip(&router, &conn, raw).await;
        assert_eq!(resp.id, "r-9");
        assert_eq!(resp.error.unwrap().code, ErrorCode::Internal);
    }

    #[tokio::test]
    async fn unparseable_without_id_is_dropped() {
        let (router, _, conn) = setup();
        assert!(router.handle(&conn, b"not json").await.is_none());
        assert!(router.handle(&conn, br#"{"method": "get"}"#).await.is_none());
    }

    #[tokio::test]
    async fn key_boundary_lengths() {
        let (router, _, _) = setup();
        let mut policy = ConnectionPolicy::allow_all("appA:", PairingLimits::default());
        policy.limits.max_key = 8;
        let conn = ClientConnection::new("cd".repeat(32), policy, Duration::from_secs(60));

        let at = roundtrip(
            &router,
            &conn,
            &request("get", json!({"key": "a".repeat(8)}), "r-1"),
        )
        .await;
        assert!(at.is_ok());

        let over = roundtrip(
            &router,
            &conn,
            &request("get", json!({"key": "a".repeat(9)}), "r-2"),
        )
        .await;
        assert_eq!(over.error.unwrap().code, ErrorCode::InvalidKey);
    }

    #[tokio::test]
    async fn value_boundary_lengths() {
        let (router, _, _) = setup();
        let mut policy = ConnectionPolicy::allow_all("appA:", PairingLimits::default());
        policy.limits.max_val = 4;
        let conn = ClientConnection::new("cd".repeat(32), policy, Duration::from_secs(60));

        let at = request("set", json!({"key": "k", "value": BASE64.encode([0u8; 4])}), "r-1");
        assert!(roundtrip(&router, &conn, &at).await.is_ok());

        let over = request("set", json!({"key": "k", "value": BASE64.encode([0u8; 5])}), "r-2");
        let resp = roundtrip(&router, &conn, &over).await;
        assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidValue);
    }

    #[tokio::test]
    async fn audit_records_written_for_requests() {
        let (router, store, conn) = setup();
        roundtrip(
            &router,
            &conn,
            &request("set", json!({"key": "k", "value": "eA=="}), "r-1"),
        )
        .await;
        roundtrip(&router, &conn, &request("get", json!({"key": "../x"}), "r-2")).await;

        // Audit appends are spawned; give them a tick.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let entries = store.list_range("kvc:__audit", 100).await.unwrap();
        assert_eq!(entries.len(), 2);
        let parsed: AuditRecord = serde_json::from_slice(&entries[0]).unwrap();
        assert!(parsed.client.contains('…'));
    }
}
