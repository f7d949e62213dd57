//! Error types for the sync engine.

use catalog_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for entity store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by an entity store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The revision counter cannot be read or advanced.
    ///
    /// No revision is minted when this is returned.
    #[error("revision counter unavailable: {0}")]
    RevisionUnavailable(String),

    /// The backing storage failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The peer rejected our signature or timestamp.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The peer answered with an error status.
    #[error("peer error {status}: {message}")]
    PeerError {
        /// HTTP status code.
        status: u16,
        /// Error body.
        message: String,
    },

    /// Protocol error (malformed message).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Entity store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Outbox journal error.
    #[error("journal error: {0}")]
    Journal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The agent configuration does not fit its engine.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Retry attempts exhausted.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last error message.
        last: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::PeerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if the peer refused our credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::AuthenticationFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection refused").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::PeerError {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!SyncError::PeerError {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!SyncError::AuthenticationFailed("bad signature".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("kind".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Timeout;
        assert_eq!(err.to_string(), "operation timed out");

        let err = SyncError::from(StoreError::RevisionUnavailable("counter offline".into()));
        assert!(err.to_string().contains("counter offline"));
        assert!(!err.is_retryable());
    }
}
