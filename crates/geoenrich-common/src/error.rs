//! Error types shared by geoenrich crates

use thiserror::Error;

/// Result type alias for geoenrich operations
pub type Result<T> = std::result::Result<T, GeoenrichError>;

/// Main error type for geoenrich
#[derive(Error, Debug)]
pub enum GeoenrichError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
