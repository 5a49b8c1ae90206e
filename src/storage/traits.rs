//! Blob store abstraction
//!
//! Key/value object storage scoped to a single bucket. The upload
//! coordinator only talks to storage through this trait, so the S3,
//! filesystem and in-memory backends are interchangeable.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::StorageResult;

use super::types::ObjectMetadata;

/// A boxed stream of bytes for streaming reads
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A lazily paginated stream of object metadata
pub type ObjectStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ObjectMetadata>> + Send + 'a>>;

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Name of the bucket this store is bound to
    fn bucket(&self) -> &str;

    /// Short backend identifier used in logs
    fn backend_name(&self) -> &'static str;

    /// Check whether the bucket exists
    async fn bucket_exists(&self) -> StorageResult<bool>;

    /// Create the bucket
    async fn create_bucket(&self) -> StorageResult<()>;

    /// Write an object, replacing any previous content under `key`
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Open an object for streaming reads
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Start a streaming write. Nothing is visible under `key` until `finish`.
    async fn put_stream(&self, key: &str, content_type: &str)
        -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Server-side copy within the bucket, recording `content_type` on the copy
    async fn copy(&self, from: &str, to: &str, content_type: &str) -> StorageResult<()>;

    /// Recursively list every object in the bucket
    fn list(&self) -> ObjectStream<'_>;

    /// Read a whole object into memory
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let mut stream = self.get_stream(key).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Create the bucket if it does not exist yet
    async fn ensure_bucket(&self) -> StorageResult<()> {
        if self.bucket_exists().await? {
            tracing::info!(bucket = %self.bucket(), "Bucket already exists");
            return Ok(());
        }

        tracing::info!(bucket = %self.bucket(), "Bucket missing, creating");
        self.create_bucket().await
    }
}

/// Incremental writer returned by [`BlobStore::put_stream`]
#[async_trait]
pub trait StreamingUpload: Send {
    /// Append bytes to the object being written
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Publish the object and return the number of bytes written
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
