//! S3-compatible blob store
//!
//! Wraps the AWS SDK for S3-compatible storage access (MinIO, AWS S3, R2).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream as S3Body,
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration, MetadataDirective,
    },
    Client,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

use super::traits::{BlobStore, ByteStream, ObjectStream, StreamingUpload};
use super::types::ObjectMetadata;

/// S3 requires every multipart part except the last to be at least 5 MiB
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

const LIST_PAGE_SIZE: i32 = 1000;

/// S3-compatible blob store bound to one bucket
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    region: String,
}

impl S3BlobStore {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "chunked-upload-server",
        );

        let region = config.region().to_string();

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        tracing::info!("S3 endpoint: {}", config.endpoint);

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region,
        })
    }

    /// Fetch one page of a recursive listing
    async fn list_page(
        &self,
        continuation_token: Option<String>,
    ) -> StorageResult<(Vec<ObjectMetadata>, Option<String>)> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(LIST_PAGE_SIZE)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_bucket()) {
                    StorageError::BucketNotFound(self.bucket.clone())
                } else {
                    StorageError::SdkError(format!("Failed to list objects: {}", e))
                }
            })?;

        let objects = response
            .contents()
            .iter()
            .map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0).max(0) as u64,
                last_modified: obj
                    .last_modified()
                    .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())),
            })
            .collect();

        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(|s| s.to_string())
        } else {
            None
        };

        Ok((objects, next))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn bucket_exists(&self) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::SdkError(format!(
                "Failed to check bucket {}: {}",
                self.bucket, e
            ))),
        }
    }

    async fn create_bucket(&self) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);

        // us-east-1 is the implicit default and rejects an explicit constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|s| s.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(e) => Err(StorageError::SdkError(format!(
                "Failed to create bucket {}: {}",
                self.bucket, e
            ))),
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to put object {}: {}", key, e)))?;

        Ok(())
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    StorageError::SdkError(format!("Failed to get object {}: {}", key, e))
                }
            })?;

        let stream = ReaderStream::new(response.body.into_async_read())
            .map(|result| result.map_err(StorageError::Io));

        Ok(Box::pin(stream))
    }

    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(S3MultipartUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            upload_id: None,
            buffer: BytesMut::new(),
            parts: Vec::new(),
            bytes_written: 0,
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds for keys that do not exist
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to delete object {}: {}", key, e)))?;

        Ok(())
    }

    async fn copy(&self, from: &str, to: &str, content_type: &str) -> StorageResult<()> {
        // CopySource is bucket/key with the key URL-encoded
        let copy_source = format!("{}/{}", self.bucket, urlencoding::encode(from));

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(to)
            .copy_source(copy_source)
            .content_type(content_type)
            .metadata_directive(MetadataDirective::Replace)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::ObjectNotFound(from.to_string())
                } else {
                    StorageError::SdkError(format!("Failed to copy {} to {}: {}", from, to, e))
                }
            })?;

        Ok(())
    }

    fn list(&self) -> ObjectStream<'_> {
        // None = listing exhausted, Some(token) = fetch the next page
        let pages = futures::stream::try_unfold(Some(None), move |state| async move {
            let Some(token) = state else {
                return Ok::<_, StorageError>(None);
            };
            let (objects, next) = self.list_page(token).await?;
            Ok(Some((objects, next.map(Some))))
        });

        Box::pin(
            pages
                .map_ok(|objects| futures::stream::iter(objects.into_iter().map(Ok::<_, StorageError>)))
                .try_flatten(),
        )
    }
}

// ============================================================================
// Multipart Streaming Upload
// ============================================================================

/// Streaming writer backed by an S3 multipart upload
///
/// The multipart upload is only started once a full part has been buffered;
/// smaller objects are written with a single PutObject on `finish`.
struct S3MultipartUpload {
    client: Client,
    bucket: String,
    key: String,
    content_type: String,
    upload_id: Option<String>,
    buffer: BytesMut,
    parts: Vec<CompletedPart>,
    bytes_written: u64,
}

impl S3MultipartUpload {
    async fn upload_id(&mut self) -> StorageResult<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }

        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type(&self.content_type)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!("Failed to start multipart upload {}: {}", self.key, e))
            })?;

        let id = response
            .upload_id()
            .ok_or_else(|| StorageError::SdkError("Multipart upload returned no upload id".into()))?
            .to_string();

        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let upload_id = self.upload_id().await?;
        let part_number = self.parts.len() as i32 + 1;

        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!(
                    "Failed to upload part {} of {}: {}",
                    part_number, self.key, e
                ))
            })?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(response.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );

        Ok(())
    }

    /// Upload the tail and complete the multipart upload
    async fn complete(&mut self, upload_id: &str, remaining: Bytes) -> StorageResult<()> {
        if !remaining.is_empty() {
            self.upload_part(remaining).await?;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts.clone()))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!(
                    "Failed to complete multipart upload {}: {}",
                    self.key, e
                ))
            })?;

        Ok(())
    }

    async fn abort_upload(&self, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!(
                    "Failed to abort multipart upload {}: {}",
                    self.key, e
                ))
            })?;

        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for S3MultipartUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= MIN_PART_SIZE {
            let part = self.buffer.split_to(MIN_PART_SIZE).freeze();
            self.upload_part(part).await?;
        }

        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        let remaining = self.buffer.split().freeze();

        let Some(upload_id) = self.upload_id.clone() else {
            // Never reached a full part: a single put is enough
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .content_type(&self.content_type)
                .body(S3Body::from(remaining))
                .send()
                .await
                .map_err(|e| {
                    StorageError::SdkError(format!("Failed to put object {}: {}", self.key, e))
                })?;
            return Ok(self.bytes_written);
        };

        let completed = self.complete(&upload_id, remaining).await;
        if completed.is_err() {
            if let Err(e) = self.abort_upload(&upload_id).await {
                tracing::warn!(key = %self.key, error = %e, "Failed to abort multipart upload");
            }
        }
        completed?;

        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        match &self.upload_id {
            Some(upload_id) => self.abort_upload(upload_id).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_store_binds_configured_bucket() {
        let mut config = Config::default().storage;
        config.bucket = "test-bucket".to_string();
        config.region = Some("eu-west-1".to_string());

        let store = S3BlobStore::new(&config).await.unwrap();

        assert_eq!(store.bucket(), "test-bucket");
        assert_eq!(store.backend_name(), "s3");
        assert_eq!(store.region, "eu-west-1");
    }
}
