//! Error types for `sealdex` operations.

use std::fmt;

/// Main error type for `sealdex` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Stored ciphertext could not be opened
    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    /// The search engine could not serve the request
    #[error("search index unavailable: {0}")]
    IndexUnavailable(#[from] IndexError),

    /// Field is not declared searchable (or encrypted) for the record type
    #[error("field `{field}` is not searchable on `{record_type}`")]
    InvalidField {
        /// Record type the caller asked about
        record_type: String,
        /// The offending field name
        field: String,
    },

    /// Record type was never provisioned, or its configuration is malformed
    #[error("configuration error: {0}")]
    Configuration(String),

    /// (De)serialization of a document or config failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to open an encryption envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    /// Value is not a well-formed `{iv, value, mac}` envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Authentication tag did not verify (wrong key, wrong field, or tampering)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// Plaintext is not valid UTF-8
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors raised while talking to the search engine.
///
/// Every variant is recoverable from the engine's point of view: callers log
/// it and fall back to degraded behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Connection refused, DNS failure, transport timeout
    Unreachable(String),

    /// Index (or task) does not exist
    NotFound(String),

    /// Engine answered with an error status
    Api {
        /// HTTP-like status code
        status: u16,
        /// Engine-provided message
        message: String,
    },

    /// An asynchronous task finished in a failed or canceled state
    TaskFailed {
        /// Task identifier
        task: u64,
        /// Engine-provided reason
        reason: String,
    },

    /// An asynchronous task did not finish in time
    Timeout {
        /// Task identifier
        task: u64,
        /// How long we waited
        waited_ms: u64,
    },

    /// Engine response could not be understood
    Malformed(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(msg) => write!(f, "search engine unreachable: {msg}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Api { status, message } => write!(f, "engine returned {status}: {message}"),
            Self::TaskFailed { task, reason } => write!(f, "task {task} failed: {reason}"),
            Self::Timeout { task, waited_ms } => {
                write!(f, "task {task} still pending after {waited_ms}ms")
            }
            Self::Malformed(msg) => write!(f, "malformed engine response: {msg}"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_error_display() {
        let err = IndexError::Timeout { task: 7, waited_ms: 250 };
        assert_eq!(err.to_string(), "task 7 still pending after 250ms");

        let err = Error::from(IndexError::NotFound("index `encrypted_user`".to_string()));
        assert_eq!(err.to_string(), "search index unavailable: not found: index `encrypted_user`");
    }

    #[test]
    fn test_invalid_field_display() {
        let err = Error::InvalidField { record_type: "user".into(), field: "ssn".into() };
        assert_eq!(err.to_string(), "field `ssn` is not searchable on `user`");
    }
}
