//! kvc-gateway binary entry point.
//!
//! Usage:
//! ```bash
//! kvc-gateway --config gateway.toml
//! KVC_SERVER_SECRET=nsec1… kvc-gateway --config gateway.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kvc_gateway::config::Config;
use kvc_gateway::http;
use kvc_gateway::server::Gateway;
use kvc_gateway::store::RedisStore;

/// Scoped, revocable key-value gateway over encrypted relay messages.
#[derive(Debug, Parser)]
#[command(name = "kvc-gateway", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.gateway.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Connecting to backend at {}", config.gateway.backend_url);
    let store = Arc::new(
        RedisStore::connect(&config.gateway.backend_url)
            .await
            .context("opening backend store")?,
    );

    let http_config = config.http.clone();
    let gateway = Gateway::new(config, store).context("assembling gateway")?;
    tracing::info!("Gateway identity: {}", gateway.public_key_hex());

    if http_config.enabled {
        let http_gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(http_gateway, http_config).await {
                tracing::error!("HTTP server exited: {e}");
            }
        });
    }

    gateway.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
