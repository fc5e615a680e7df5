use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::config::StorageConfig;
use super::{object_url, ObjectReader, ObjectSink, ObjectStore};
use crate::error::StorageError;

/// S3 (or MinIO) backed object store
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    part_size: usize,
}

impl S3Storage {
    pub fn new(config: &StorageConfig) -> Self {
        debug!(
            endpoint = ?config.endpoint,
            region = %config.region,
            path_style = config.path_style,
            "Initializing S3 client"
        );

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "geoenrich-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            part_size: config.part_size_bytes,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    #[instrument(skip(self))]
    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Open {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    #[instrument(skip(self))]
    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<Box<dyn ObjectSink>, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Open {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StorageError::Open {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "multipart upload returned no upload id".to_string(),
            })?
            .to_string();

        debug!(%upload_id, "Started multipart upload");

        Ok(Box::new(MultipartSink {
            client: self.client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            upload_id,
            part_size: self.part_size,
            buffer: Vec::with_capacity(self.part_size),
            parts: Vec::new(),
        }))
    }

    #[instrument(skip(self))]
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presign_error = |message: String| StorageError::Presign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        let presigning_config =
            PresigningConfig::expires_in(expires_in).map_err(|e| presign_error(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| presign_error(DisplayErrorContext(&e).to_string()))?;

        debug!(expires_secs = expires_in.as_secs(), "Presigned {}", object_url(bucket, key));
        Ok(request.uri().to_string())
    }
}

/// Streams an object as fixed-size multipart parts.
struct MultipartSink {
    client: Client,
    bucket: String,
    key: String,
    content_type: String,
    upload_id: String,
    part_size: usize,
    buffer: Vec<u8>,
    parts: Vec<CompletedPart>,
}

impl MultipartSink {
    async fn upload_part(&mut self, body: Vec<u8>) -> Result<(), StorageError> {
        let part_number = self.parts.len() as i32 + 1;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Write(DisplayErrorContext(&e).to_string()))?;

        debug!(part_number, "Uploaded part");

        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(output.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn abort_upload(&self) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| StorageError::Finalize(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn complete(mut self) -> Result<(), StorageError> {
        // Nothing was large enough for a part: store the buffer directly.
        if self.parts.is_empty() {
            self.abort_upload().await?;
            let body = std::mem::take(&mut self.buffer);
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .content_type(&self.content_type)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| StorageError::Finalize(DisplayErrorContext(&e).to_string()))?;
            return Ok(());
        }

        if !self.buffer.is_empty() {
            let last = std::mem::take(&mut self.buffer);
            self.upload_part(last).await?;
        }

        let parts = std::mem::take(&mut self.parts);
        let part_count = parts.len();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| StorageError::Finalize(DisplayErrorContext(&e).to_string()))?;

        debug!(part_count, "Completed multipart upload");
        Ok(())
    }
}

#[async_trait]
impl ObjectSink for MultipartSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(bytes);

        while self.buffer.len() >= self.part_size {
            let rest = self.buffer.split_off(self.part_size);
            let part = std::mem::replace(&mut self.buffer, rest);
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let url = object_url(&self.bucket, &self.key);
        let sink = *self;
        let client = sink.client.clone();
        let (bucket, key, upload_id) = (sink.bucket.clone(), sink.key.clone(), sink.upload_id.clone());

        match sink.complete().await {
            Ok(()) => {
                info!("Finalized {}", url);
                Ok(())
            },
            Err(e) => {
                warn!(error = %e, "Finalizing {} failed, aborting upload", url);
                if let Err(abort_err) = client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(error = %DisplayErrorContext(&abort_err), "Abort after failed finalize also failed");
                }
                Err(e)
            },
        }
    }

    async fn abort(self: Box<Self>) -> Result<(), StorageError> {
        warn!("Aborting upload of {}", object_url(&self.bucket, &self.key));
        self.abort_upload().await
    }
}
