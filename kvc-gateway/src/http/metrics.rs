//! Prometheus metrics endpoint.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};

use crate::server::Gateway;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format. Gauges reflect current
/// state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(gateway): Extension<Arc<Gateway>>) -> impl IntoResponse {
    let m = gateway.metrics();
    let pool = gateway.pool_status();

    // Gauges — current state
    let connections = gateway.connection_count();
    let relays_connected = pool.connected_count();
    let backend_ready = u8::from(gateway.backend_ready().await);

    // Counters — monotonic since startup
    let events = m.events_received.load(Ordering::Relaxed);
    let bad_sigs = m.invalid_signatures.load(Ordering::Relaxed);
    let stale = m.stale_events.load(Ordering::Relaxed);
    let decrypt_failures = m.decrypt_failures.load(Ordering::Relaxed);
    let dropped = m.dropped_payloads.load(Ordering::Relaxed);
    let routed = m.requests_routed.load(Ordering::Relaxed);
    let published = m.responses_published.load(Ordering::Relaxed);
    let publish_failures = m.publish_failures.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP kvc_gateway_connections Known client connections
# TYPE kvc_gateway_connections gauge
kvc_gateway_connections {connections}

# HELP kvc_gateway_relays_connected Relays with a live session
# TYPE kvc_gateway_relays_connected gauge
kvc_gateway_relays_connected {relays_connected}

# HELP kvc_gateway_backend_ready Whether the backend answers probes
# TYPE kvc_gateway_backend_ready gauge
kvc_gateway_backend_ready {backend_ready}

# HELP kvc_gateway_info Server information
# TYPE kvc_gateway_info gauge
kvc_gateway_info{{version="{version}"}} 1

# HELP kvc_gateway_events_received_total Events read off the relays
# TYPE kvc_gateway_events_received_total counter
kvc_gateway_events_received_total {events}

# HELP kvc_gateway_invalid_signatures_total Events dropped for bad signatures
# TYPE kvc_gateway_invalid_signatures_total counter
kvc_gateway_invalid_signatures_total {bad_sigs}

# HELP kvc_gateway_stale_events_total Events outside the freshness window
# TYPE kvc_gateway_stale_events_total counter
kvc_gateway_stale_events_total {stale}

# HELP kvc_gateway_decrypt_failures_total Payloads neither scheme could decrypt
# TYPE kvc_gateway_decrypt_failures_total counter
kvc_gateway_decrypt_failures_total {decrypt_failures}

# HELP kvc_gateway_dropped_payloads_total Decrypted payloads that were unroutable
# TYPE kvc_gateway_dropped_payloads_total counter
kvc_gateway_dropped_payloads_total {dropped}

# HELP kvc_gateway_requests_routed_total Requests that produced a response
# TYPE kvc_gateway_requests_routed_total counter
kvc_gateway_requests_routed_total {routed}

# HELP kvc_gateway_responses_published_total Responses accepted by a relay
# TYPE kvc_gateway_responses_published_total counter
kvc_gateway_responses_published_total {published}

# HELP kvc_gateway_publish_failures_total Responses no relay accepted
# TYPE kvc_gateway_publish_failures_total counter
kvc_gateway_publish_failures_total {publish_failures}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
