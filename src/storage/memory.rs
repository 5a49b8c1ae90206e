//! In-memory blob store backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};

use super::traits::{BlobStore, ByteStream, ObjectStream, StreamingUpload};
use super::types::ObjectMetadata;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

/// Volatile blob store backed by a `RwLock<BTreeMap>`.
///
/// Used by tests and by `STORAGE_BACKEND=memory` for local development.
/// Content is lost when the process exits.
pub struct MemoryBlobStore {
    bucket: String,
    bucket_created: AtomicBool,
    objects: Arc<RwLock<ObjectMap>>,
}

type ObjectMap = BTreeMap<String, StoredObject>;

impl MemoryBlobStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            bucket_created: AtomicBool::new(false),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Keys currently stored, in lexicographic order
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Content type recorded for `key`
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|obj| obj.content_type.clone())
    }
}

fn insert(objects: &RwLock<ObjectMap>, key: &str, data: Bytes, content_type: &str) {
    objects.write().insert(
        key.to_string(),
        StoredObject {
            data,
            content_type: content_type.to_string(),
            last_modified: Utc::now(),
        },
    );
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn bucket_exists(&self) -> StorageResult<bool> {
        Ok(self.bucket_created.load(Ordering::Acquire))
    }

    async fn create_bucket(&self) -> StorageResult<()> {
        self.bucket_created.store(true, Ordering::Release);
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        insert(&self.objects, key, data, content_type);
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self
            .objects
            .read()
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        Ok(Box::pin(futures::stream::once(async move { Ok::<_, StorageError>(data) })))
    }

    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(MemoryUpload {
            objects: Arc::clone(&self.objects),
            key: key.to_string(),
            content_type: content_type.to_string(),
            buffer: BytesMut::new(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str, content_type: &str) -> StorageResult<()> {
        let mut objects = self.objects.write();
        let mut copied = objects
            .get(from)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(from.to_string()))?;
        copied.content_type = content_type.to_string();
        copied.last_modified = Utc::now();
        objects.insert(to.to_string(), copied);
        Ok(())
    }

    fn list(&self) -> ObjectStream<'_> {
        let snapshot: Vec<_> = self
            .objects
            .read()
            .iter()
            .map(|(key, obj)| {
                Ok::<_, StorageError>(ObjectMetadata {
                    key: key.clone(),
                    size: obj.data.len() as u64,
                    last_modified: Some(obj.last_modified),
                })
            })
            .collect();

        Box::pin(futures::stream::iter(snapshot))
    }
}

/// Buffers a streaming write until `finish`
struct MemoryUpload {
    objects: Arc<RwLock<ObjectMap>>,
    key: String,
    content_type: String,
    buffer: BytesMut,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let MemoryUpload {
            objects,
            key,
            content_type,
            buffer,
        } = *self;
        let size = buffer.len() as u64;
        insert(&objects, &key, buffer.freeze(), &content_type);
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_put_copy_delete() {
        let store = MemoryBlobStore::new("uploads");
        store.ensure_bucket().await.unwrap();
        assert!(store.bucket_exists().await.unwrap());

        store
            .put("a.txt", Bytes::from_static(b"alpha"), "application/octet-stream")
            .await
            .unwrap();
        store.copy("a.txt", "b.txt", "text/plain").await.unwrap();
        store.delete("a.txt").await.unwrap();

        assert_eq!(store.keys(), vec!["b.txt".to_string()]);
        assert_eq!(store.get("b.txt").await.unwrap(), Bytes::from_static(b"alpha"));
        assert_eq!(store.content_type("b.txt").as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_streaming_upload_publishes_on_finish() {
        let store = MemoryBlobStore::new("uploads");

        let mut upload = store.put_stream("joined", "text/plain").await.unwrap();
        upload.write(Bytes::from_static(b"left-")).await.unwrap();
        upload.write(Bytes::from_static(b"right")).await.unwrap();
        assert!(store.keys().is_empty());

        assert_eq!(upload.finish().await.unwrap(), 10);
        assert_eq!(store.get("joined").await.unwrap(), Bytes::from_static(b"left-right"));

        let listed: Vec<_> = store.list().try_collect().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 10);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryBlobStore::new("uploads");

        assert!(matches!(
            store.get("nope").await,
            Err(StorageError::ObjectNotFound(_))
        ));
        assert!(matches!(
            store.copy("nope", "other", "text/plain").await,
            Err(StorageError::ObjectNotFound(_))
        ));
    }
}
