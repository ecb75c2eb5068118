//! Namespace isolation.
//!
//! Every persisted key must live under its connection's namespace prefix.
//! The guard canonicalizes client-supplied keys into the namespace and
//! rejects anything that could escape it: traversal sequences, wildcard and
//! glob metacharacters, shell-expansion fragments, control characters, and
//! keys that name a foreign namespace.

/// Maximum namespace length, including the trailing `:`.
pub const MAX_NAMESPACE_LEN: usize = 128;

/// Why a key was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyViolation {
    /// The key is empty or whitespace-only.
    #[error("key is empty")]
    Empty,

    /// The key contains a forbidden pattern.
    #[error("key contains forbidden pattern: {0}")]
    Forbidden(&'static str),

    /// The key names a namespace other than the connection's.
    #[error("key belongs to a foreign namespace")]
    ForeignNamespace,
}

/// Check that a namespace is non-empty, `[A-Za-z0-9_-]` only, ends with a
/// single trailing `:`, and is at most [`MAX_NAMESPACE_LEN`] characters.
pub fn is_valid_namespace(ns: &str) -> bool {
    if ns.len() < 2 || ns.len() > MAX_NAMESPACE_LEN {
        return false;
    }
    let Some(body) = ns.strip_suffix(':') else {
        return false;
    };
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validates and canonicalizes keys into one namespace.
#[derive(Debug, Clone)]
pub struct NamespaceGuard {
    namespace: String,
}

impl NamespaceGuard {
    /// Create a guard for a namespace already validated by
    /// [`is_valid_namespace`].
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        debug_assert!(is_valid_namespace(&namespace));
        Self { namespace }
    }

    /// The namespace this guard enforces.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Validate `key` and return its fully-qualified form.
    ///
    /// Keys already carrying the namespace prefix pass through unchanged;
    /// bare keys are auto-prefixed; keys naming another namespace or
    /// containing any forbidden pattern are rejected.
    pub fn resolve(&self, key: &str) -> Result<String, KeyViolation> {
        if key.is_empty() || key.chars().all(char::is_whitespace) {
            return Err(KeyViolation::Empty);
        }

        if let Some(pattern) = forbidden_pattern(key) {
            return Err(KeyViolation::Forbidden(pattern));
        }

        if key.starts_with(&self.namespace) {
            return Ok(key.to_string());
        }

        // A colon past position 0 claims some other namespace.
        if key.char_indices().any(|(i, c)| c == ':' && i > 0) {
            return Err(KeyViolation::ForeignNamespace);
        }

        Ok(format!("{}{}", self.namespace, key))
    }
}

/// Scan for the forbidden patterns that could escape the namespace or
/// confuse the backend. Returns the first matched pattern name.
fn forbidden_pattern(key: &str) -> Option<&'static str> {
    // `..` also covers any run of three or more dots.
    if key.contains("..") {
        return Some("..");
    }
    for c in key.chars() {
        match c {
            '\0' => return Some("NUL"),
            '\r' => return Some("CR"),
            '\n' => return Some("LF"),
            '*' => return Some("*"),
            '?' => return Some("?"),
            '[' => return Some("["),
            ']' => return Some("]"),
            '\\' => return Some("\\"),
            // Control characters; TAB is the one C0 code left alone.
            c if (c as u32) < 0x20 && c != '\t' => return Some("control character"),
            '\u{7f}' => return Some("control character"),
            _ => {}
        }
    }
    for pattern in ["${", "$((", "eval(", "exec("] {
        if key.contains(pattern) {
            // Map to a static name without leaking the key itself.
            return Some(match pattern {
                "${" => "${",
                "$((" => "$((",
                "eval(" => "eval(",
                _ => "exec(",
            });
        }
    }
    None
}
