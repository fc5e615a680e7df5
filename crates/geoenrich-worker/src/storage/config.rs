use serde::{Deserialize, Serialize};

use crate::config::{env_opt, env_or};
use crate::error::ConfigError;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

pub const DEFAULT_PART_SIZE_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_INPUT_BUCKET: &str = "uploads";
pub const DEFAULT_RESULTS_BUCKET: &str = "results";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
    pub input_bucket: String,
    pub results_bucket: String,
    pub part_size_bytes: usize,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: env_opt("S3_ENDPOINT"),
            region: env_or("S3_REGION", DEFAULT_REGION.to_string())?,
            access_key: env_opt("S3_ACCESS_KEY")
                .or_else(|| env_opt("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|| "minioadmin".to_string()),
            secret_key: env_opt("S3_SECRET_KEY")
                .or_else(|| env_opt("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|| "minioadmin".to_string()),
            path_style: env_or("S3_PATH_STYLE", false)?,
            input_bucket: env_or("S3_INPUT_BUCKET", DEFAULT_INPUT_BUCKET.to_string())?,
            results_bucket: env_or("S3_RESULTS_BUCKET", DEFAULT_RESULTS_BUCKET.to_string())?,
            part_size_bytes: env_or("S3_PART_SIZE_BYTES", DEFAULT_PART_SIZE_BYTES)?,
        })
    }

    /// Local MinIO with path-style addressing and default buckets.
    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            path_style: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(ConfigError::Validation(format!(
                "S3 part size ({} bytes) is below the {} byte minimum",
                self.part_size_bytes, MIN_PART_SIZE_BYTES
            )));
        }
        if self.input_bucket.is_empty() || self.results_bucket.is_empty() {
            return Err(ConfigError::Validation("S3 bucket names cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: false,
            input_bucket: DEFAULT_INPUT_BUCKET.to_string(),
            results_bucket: DEFAULT_RESULTS_BUCKET.to_string(),
            part_size_bytes: DEFAULT_PART_SIZE_BYTES,
        }
    }
}
