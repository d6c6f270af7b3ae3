//! Error types for the pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::types::JobStatus;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue capacity exceeded (backpressure signal)
    #[error("Job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Operation on a job id the queue has never seen
    #[error("Unknown job: {0}")]
    UnknownJob(Uuid),

    /// No processor registered for a job type
    #[error("No processor registered for job type '{0}'")]
    UnknownJobType(String),

    /// Cancel/reprioritize on a job that already left the Pending state
    #[error("Job {id} is {status:?}, expected Pending")]
    JobNotPending { id: Uuid, status: JobStatus },

    /// A processor call failed
    #[error("Processor error: {0}")]
    Processor(String),

    /// A watcher poll cycle failed; the previous snapshot is retained
    #[error("Poll error: {0}")]
    Poll(String),

    /// Object store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested object does not exist
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Tabular store failure
    #[error("Table store error: {0}")]
    Table(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a processor error
    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor(message.into())
    }

    /// Create a poll error
    pub fn poll(message: impl Into<String>) -> Self {
        Self::Poll(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a table store error
    pub fn table(message: impl Into<String>) -> Self {
        Self::Table(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::BAD_REQUEST, "config_error", msg.clone()),
            Error::QueueFull { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "queue_full",
                self.to_string(),
            ),
            Error::UnknownJob(_) => (StatusCode::NOT_FOUND, "unknown_job", self.to_string()),
            Error::UnknownJobType(_) => (
                StatusCode::BAD_REQUEST,
                "unknown_job_type",
                self.to_string(),
            ),
            Error::JobNotPending { .. } => {
                (StatusCode::CONFLICT, "job_not_pending", self.to_string())
            }
            Error::Processor(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "processor_error", msg.clone())
            }
            Error::Poll(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "poll_error", msg.clone()),
            Error::Storage(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg.clone())
            }
            Error::ObjectNotFound { .. } => {
                (StatusCode::NOT_FOUND, "object_not_found", self.to_string())
            }
            Error::Table(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "table_error", msg.clone())
            }
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
