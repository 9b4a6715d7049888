//! Error types for the counter-store crate.
//!
//! Every store operation returns [`StoreError`] via [`StoreResult`].
//! Variants map one-to-one onto the failure kinds callers need to branch on;
//! transport-level problems collapse into [`StoreError::Transient`] and
//! [`StoreError::Timeout`].

use std::time::Duration;

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage core.
#[derive(Debug, Error)]
pub enum StoreError {
    // -- Startup -------------------------------------------------------------
    /// The connection URL could not be parsed or the store is unreachable.
    ///
    /// Only produced while connecting; the URL is always password-redacted.
    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Key-value -----------------------------------------------------------
    /// The key does not exist (or has expired).
    #[error("key[{key}] does not exist")]
    NotFound { key: String },

    /// The key exists but holds the empty string.
    #[error("key[{key}] is empty")]
    EmptyValue { key: String },

    /// The stored value is not an integer, so it cannot be incremented.
    #[error("key[{key}] does not hold an integer value")]
    TypeMismatch { key: String },

    /// A pipelined batch failed as a whole.
    #[error("exec pipeline failed: {reason}")]
    Pipeline { reason: String },

    /// A cursor scan failed part-way through.
    #[error("scan pattern[{pattern}] failed: {reason}")]
    Scan { pattern: String, reason: String },

    /// The value was read but its TTL could not be refreshed.
    #[error("expire key[{key}] failed: {reason}")]
    Refresh { key: String, reason: String },

    /// A transport or server problem that may succeed on retry.
    #[error("store request failed: {0}")]
    Transient(String),

    /// The operation did not complete before its deadline.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    // -- Namespaces ----------------------------------------------------------
    /// The namespace is already registered.
    #[error("namespace[{namespace}] already exists")]
    AlreadyExists { namespace: String },

    /// The namespace is not registered.
    #[error("invalid namespace: {namespace}")]
    InvalidNamespace { namespace: String },

    /// The supplied secret does not authorize access to the namespace.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// An input violated a documented precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Whether retrying the same call could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_)
                | Self::Timeout { .. }
                | Self::Pipeline { .. }
                | Self::Scan { .. }
                | Self::Refresh { .. }
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transient(err.to_string())
    }
}
