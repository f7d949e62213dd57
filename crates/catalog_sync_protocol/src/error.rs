//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while building, decoding or authenticating
/// protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not a JSON object or does not match the entity kind.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The checksum carried on the wire does not match the payload.
    #[error("checksum mismatch for entity {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Entity ID.
        id: String,
        /// Checksum recomputed from the payload.
        expected: String,
        /// Checksum received on the wire.
        actual: String,
    },

    /// The request timestamp lies outside the accepted skew window.
    #[error("timestamp {timestamp} outside skew window of {window_ms}ms (now {now})")]
    TimestampOutOfWindow {
        /// Timestamp carried by the request (unix millis).
        timestamp: i64,
        /// Receiver's current time (unix millis).
        now: i64,
        /// Accepted skew in milliseconds.
        window_ms: i64,
    },

    /// Unknown replica origin name.
    #[error("unknown origin: {0}")]
    UnknownOrigin(String),
}
