//! Durable object storage
//!
//! Job input is streamed out of the input bucket and results are streamed
//! into the results bucket. Neither side is ever held in memory whole.

use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::error::StorageError;

pub mod config;
pub mod s3;

pub use s3::S3Storage;

pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError>;

    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<Box<dyn ObjectSink>, StorageError>;

    /// Time-limited GET URL for an object.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

/// Incremental writer for one object.
///
/// Bytes become visible only after [`finish`](ObjectSink::finish) succeeds.
/// Dropping a sink without `finish` or `abort` may leave an incomplete
/// upload behind.
#[async_trait]
pub trait ObjectSink: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    async fn finish(self: Box<Self>) -> Result<(), StorageError>;

    async fn abort(self: Box<Self>) -> Result<(), StorageError>;
}

/// `s3://bucket/key` form used in job records and logs.
pub fn object_url(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

/// Split `s3://bucket/key` into its parts; `None` for a bare key.
pub fn split_object_url(location: &str) -> Option<(&str, &str)> {
    let rest = location.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    (!bucket.is_empty() && !key.is_empty()).then_some((bucket, key))
}

/// Key of a job's NDJSON output in the results bucket.
pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("results/{job_id}.jsonl")
}
