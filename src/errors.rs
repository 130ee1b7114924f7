use crate::services::object_backend::BackendError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failure kinds surfaced by the storage core.
///
/// Adapter failures always carry the operation and resource key that
/// produced them.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payload too large: {0}")]
    TooLarge(String),
    #[error("{op} `{key}`: backend I/O failed: {source}")]
    Backend {
        op: &'static str,
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("{op} `{key}`: metadata store failed: {source}")]
    Metadata {
        op: &'static str,
        key: String,
        #[source]
        source: sqlx::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Wrap a backend failure, for use with `map_err`.
    pub fn backend(op: &'static str, key: impl Into<String>) -> impl FnOnce(BackendError) -> Self {
        let key = key.into();
        move |source| StorageError::Backend { op, key, source }
    }

    /// Wrap a metadata store failure, for use with `map_err`.
    pub fn metadata(op: &'static str, key: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let key = key.into();
        move |source| StorageError::Metadata { op, key, source }
    }

    /// Transport status for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            StorageError::Validation(_) => StatusCode::BAD_REQUEST,
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::Forbidden(_) => StatusCode::FORBIDDEN,
            StorageError::Conflict(_) => StatusCode::CONFLICT,
            StorageError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            StorageError::Backend { .. } | StorageError::Metadata { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, "storage operation failed");
        }
        AppError::new(status, err.to_string())
    }
}
