//! Worker error types
//!
//! One enum per collaborator seam. Pipeline stages convert these into logged
//! skips or typed results; only the orchestrator turns them into a job
//! status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Invalid or missing configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Object storage failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Failed to open s3://{bucket}/{key}: {message}")]
    Open {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Failed to write object: {0}")]
    Write(String),

    #[error("Failed to finalize object: {0}")]
    Finalize(String),

    #[error("Failed to presign s3://{bucket}/{key}: {message}")]
    Presign {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Places lookup failures, as seen by the resolver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Http(u16),

    #[error("lookup returned status {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Status {
        status: String,
        message: Option<String>,
    },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("lookup cancelled")]
    Cancelled,
}

/// Job status store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Common(#[from] geoenrich_common::GeoenrichError),
}

/// Job queue failures
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Job-fatal pipeline failures
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Output sink failed: {0}")]
    Sink(#[source] StorageError),

    #[error("Pipeline stage '{0}' panicked")]
    StagePanicked(&'static str),

    #[error("Processing cancelled")]
    Cancelled,
}

/// Errors returned by the status API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            StoreError::Database(e) => ApiError::Database(e),
            StoreError::Common(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(ref id) => (StatusCode::NOT_FOUND, format!("Job not found: {id}")),
            ApiError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            ApiError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
