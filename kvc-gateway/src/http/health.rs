//! Health check endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::{Extension, Json};
use serde::Serialize;

use crate::server::Gateway;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status (`ok` or `degraded`).
    pub status: String,
    /// Server version.
    pub version: String,
    /// Lifecycle state.
    pub state: String,
    /// Known client connections.
    pub connections: usize,
    /// Relays with a live session.
    pub relays_connected: usize,
    /// Configured relays.
    pub relays_total: usize,
    /// Whether the backend answers probes.
    pub backend_ready: bool,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(gateway): Extension<Arc<Gateway>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let pool = gateway.pool_status();
    let backend_ready = gateway.backend_ready().await;
    let degraded = !backend_ready || pool.connected_count() == 0;

    Json(HealthStatus {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        state: gateway.state().as_str().to_string(),
        connections: gateway.connection_count(),
        relays_connected: pool.connected_count(),
        relays_total: pool.total(),
        backend_ready,
        uptime_seconds: uptime,
    })
}
