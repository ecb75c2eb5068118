//! Error types for kvc-types.

/// Errors produced while encoding or decoding wire types.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// An event failed structural validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// An event signature did not verify.
    #[error("signature verification failed: {0}")]
    Signature(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A pairing URI could not be parsed.
    #[error("invalid pairing URI: {0}")]
    InvalidUri(String),

    /// A bech32 string could not be decoded.
    #[error("invalid bech32: {0}")]
    InvalidBech32(String),
}
