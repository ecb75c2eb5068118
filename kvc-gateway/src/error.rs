//! Error types for kvc-gateway.

/// Main error type for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Keyring error.
    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),

    /// Backend store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Relay pool error.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Envelope crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Connection registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Wire type error.
    #[error("wire error: {0}")]
    Types(#[from] kvc_types::TypesError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Keyring errors.
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    /// The secret is not a valid bech32 `nsec` string.
    #[error("malformed server secret: {0}")]
    MalformedSecret(String),

    /// The scalar is outside the curve order.
    #[error("invalid secret scalar: {0}")]
    InvalidScalar(String),

    /// A peer public key could not be parsed.
    #[error("invalid peer public key: {0}")]
    InvalidPeerKey(String),
}

/// Backend store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed an operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend is unreachable after retries.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The stored value was not in the expected shape.
    #[error("unexpected backend reply: {0}")]
    BadReply(String),
}

/// Relay pool errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No relay accepted a publish.
    #[error("publish failed: no relay accepted the event")]
    PublishFailed,

    /// No relay URLs were configured.
    #[error("no relays configured")]
    NoRelays,

    /// The pool is shut down.
    #[error("relay pool is shut down")]
    ShutDown,
}

/// Envelope crypto errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    /// Neither scheme could decrypt the payload.
    #[error("decryption failed")]
    DecryptFailed,

    /// The requested scheme is disabled by configuration.
    #[error("encryption scheme {0} is disabled")]
    SchemeDisabled(&'static str),
}

/// Connection registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry file could not be read.
    #[error("failed to read registry {path}: {source}")]
    Read {
        /// Path to the registry file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The registry file is not valid JSON.
    #[error("failed to parse registry {path}: {source}")]
    Parse {
        /// Path to the registry file.
        path: std::path::PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// An entry carries a malformed namespace or method.
    #[error("invalid registry entry for {pubkey}: {reason}")]
    InvalidEntry {
        /// The client public key of the offending entry.
        pubkey: String,
        /// Why the entry was rejected.
        reason: String,
    },
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
