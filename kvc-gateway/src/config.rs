//! Configuration loading for kvc-gateway.
//!
//! Configuration is loaded from a TOML file (default: `gateway.toml`).
//! The server secret may instead be supplied through the
//! `KVC_SERVER_SECRET` environment variable so the file need not hold key
//! material.

use serde::Deserialize;
use std::path::PathBuf;

use crate::guard;

/// Environment variable that overrides `gateway.server_secret`.
pub const SERVER_SECRET_ENV: &str = "KVC_SERVER_SECRET";

/// Root configuration for kvc-gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Gateway identity and transport configuration.
    pub gateway: GatewayConfig,
    /// Default per-connection limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Timing knobs.
    #[serde(default)]
    pub timing: TimingConfig,
    /// HTTP observability endpoints.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Gateway identity and transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Connection string for the backend store.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Default namespace; must match `[A-Za-z0-9_-]+:`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Relay URLs to maintain sessions with.
    pub relays: Vec<String>,
    /// Bech32 `nsec` server secret. Optional; the environment wins.
    pub server_secret: Option<String>,
    /// Preferred envelope encryption scheme.
    #[serde(default)]
    pub encryption_pref: SchemePref,
    /// Whether the legacy CBC scheme is accepted at all.
    #[serde(default = "default_v1_enabled")]
    pub v1_enabled: bool,
    /// Diagnostic verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Path to the persisted connection registry.
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
}

/// Preferred envelope encryption scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemePref {
    /// Modern AEAD scheme.
    #[default]
    V2,
    /// Legacy CBC+MAC scheme.
    V1,
}

/// Default per-connection limits (used for unknown clients and as the
/// baseline for registry entries).
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum requests per rolling 60-second window.
    #[serde(default = "default_mps")]
    pub mps: u32,
    /// Maximum request+response bytes per rolling 60-second window.
    #[serde(default = "default_bps")]
    pub bps: u64,
    /// Maximum key length in characters.
    #[serde(default = "default_max_key")]
    pub max_key: usize,
    /// Maximum decoded value length in bytes.
    #[serde(default = "default_max_val")]
    pub max_val: usize,
    /// Maximum number of keys in one `mget`.
    #[serde(default = "default_mget_max")]
    pub mget_max: usize,
}

/// Timing knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Per-request deadline in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum accepted event age in seconds.
    #[serde(default = "default_event_max_age")]
    pub event_max_age_secs: u64,
    /// Maximum tolerated future clock skew in seconds.
    #[serde(default = "default_clock_skew_max")]
    pub clock_skew_max_secs: u64,
    /// Idempotency window in seconds.
    #[serde(default = "default_idempotency_window")]
    pub idempotency_window_secs: u64,
    /// Reconnect attempts per relay before giving up on it.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max: u32,
}

/// HTTP observability configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Whether to serve the HTTP endpoints at all.
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    /// Bind address for the HTTP server.
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable the Prometheus metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_backend_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_namespace() -> String {
    "kvc:".to_string()
}

fn default_v1_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("connections.json")
}

fn default_mps() -> u32 {
    60
}

fn default_bps() -> u64 {
    1_048_576
}

fn default_max_key() -> usize {
    256
}

fn default_max_val() -> usize {
    65_536
}

fn default_mget_max() -> usize {
    16
}

fn default_request_timeout() -> u64 {
    15
}

fn default_event_max_age() -> u64 {
    300
}

fn default_clock_skew_max() -> u64 {
    60
}

fn default_idempotency_window() -> u64 {
    60
}

fn default_reconnect_max() -> u32 {
    10
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            mps: default_mps(),
            bps: default_bps(),
            max_key: default_max_key(),
            max_val: default_max_val(),
            mget_max: default_mget_max(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            event_max_age_secs: default_event_max_age(),
            clock_skew_max_secs: default_clock_skew_max(),
            idempotency_window_secs: default_idempotency_window(),
            reconnect_max: default_reconnect_max(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !guard::is_valid_namespace(&self.gateway.namespace) {
            return Err(ConfigError::Invalid(format!(
                "namespace {:?} must match [A-Za-z0-9_-]+ and end with ':'",
                self.gateway.namespace
            )));
        }
        if self.gateway.relays.is_empty() {
            return Err(ConfigError::Invalid("at least one relay is required".into()));
        }
        if self.limits.mps == 0 || self.limits.bps == 0 {
            return Err(ConfigError::Invalid("limits must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the server secret: environment first, then the config file.
    pub fn server_secret(&self) -> Result<String, ConfigError> {
        if let Ok(secret) = std::env::var(SERVER_SECRET_ENV) {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
        self.gateway
            .server_secret
            .clone()
            .ok_or(ConfigError::MissingSecret)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A field value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// No server secret in environment or file.
    #[error("server secret missing: set {SERVER_SECRET_ENV} or gateway.server_secret")]
    MissingSecret,
}
