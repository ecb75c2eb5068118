//! Request and response documents.
//!
//! These are the plaintext JSON payloads that get encrypted before being
//! carried in an [`Event`](crate::Event)'s `content` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decrypted client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Wire name of the requested method.
    pub method: String,
    /// Method parameters. Shape depends on the method.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Opaque client-chosen deduplication token.
    pub id: String,
}

/// A response to a [`Request`].
///
/// Exactly one of `result` / `error` is non-null. Both fields are always
/// serialized so that replayed responses are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Success payload, or null on error.
    pub result: Option<Value>,
    /// Error payload, or null on success.
    pub error: Option<ErrorBody>,
    /// Echo of the request id.
    pub id: String,
}

impl Response {
    /// Build a success response.
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id: id.into(),
        }
    }

    /// Build an error response.
    pub fn fail(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
            id: id.into(),
        }
    }

    /// Whether this is a success response.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The error half of a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// One of the closed set of protocol error codes.
    pub code: ErrorCode,
    /// Short, non-revealing human-readable message.
    pub message: String,
}

/// The closed set of protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The client identity is not authorized at all.
    Unauthorized,
    /// The operation or key is outside the connection's policy.
    Restricted,
    /// Request count or byte budget exhausted for the current window.
    RateLimited,
    /// Batch or payload exceeds the connection's configured bounds.
    PayloadTooLarge,
    /// Key failed structural validation.
    InvalidKey,
    /// Value failed structural validation.
    InvalidValue,
    /// The gateway recognizes but does not implement the operation.
    NotImplemented,
    /// Backend or gateway fault; details are logged server-side only.
    Internal,
}

impl ErrorCode {
    /// The wire name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Restricted => "RESTRICTED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::InvalidKey => "INVALID_KEY",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
