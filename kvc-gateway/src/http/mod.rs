//! HTTP observability endpoints.
//!
//! Serves `/health` and (optionally) `/metrics`. This surface is
//! operational only; pairing administration lives elsewhere.

mod health;
mod metrics;

pub use health::{health_handler, init_start_time, HealthStatus};
pub use metrics::metrics_handler;

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::config::HttpConfig;
use crate::error::GatewayError;
use crate::server::Gateway;

/// Serve the observability endpoints until the process exits.
pub async fn serve(gateway: Arc<Gateway>, config: HttpConfig) -> Result<(), GatewayError> {
    init_start_time();

    let mut app = Router::new().route("/health", get(health_handler));
    if config.metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }
    let app = app.layer(Extension(gateway));

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("HTTP endpoints on {}", config.bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}
