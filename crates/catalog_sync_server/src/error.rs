//! Error types for the sync server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use catalog_sync_engine::SyncError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Missing, stale, replayed or wrong request signature.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Push carried more changes than allowed.
    #[error("batch too large: {size} changes, at most {max} allowed")]
    BatchTooLarge {
        /// Changes in the request.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Server configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine or store failure.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Unauthorized(_)
                | ServerError::InvalidRequest(_)
                | ServerError::BatchTooLarge { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::InvalidRequest(_) | ServerError::BatchTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.is_server_error() {
            error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
