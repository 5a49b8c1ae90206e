//! Local filesystem blob store
//!
//! Objects live under `<base>/<bucket>/<key>`. Writes are staged under
//! `<base>/.staging` and renamed into place, so readers and listings never
//! observe a half-written object.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

use super::traits::{BlobStore, ByteStream, ObjectStream, StreamingUpload};
use super::types::ObjectMetadata;

/// Filesystem-backed blob store
pub struct LocalBlobStore {
    root: PathBuf,
    staging: PathBuf,
    bucket: String,
}

impl LocalBlobStore {
    pub fn new(base_path: &Path, bucket: &str) -> Self {
        Self {
            root: base_path.join(bucket),
            staging: base_path.join(".staging"),
            bucket: bucket.to_string(),
        }
    }

    /// Resolve a key to a path inside the bucket directory
    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.root.join(relative))
    }

    async fn staging_file(&self) -> StorageResult<(PathBuf, tokio::fs::File)> {
        tokio::fs::create_dir_all(&self.staging).await?;
        let path = self.staging.join(Uuid::new_v4().simple().to_string());
        let file = tokio::fs::File::create(&path).await?;
        Ok((path, file))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Read one directory, returning its files and queuing its subdirectories
    async fn scan_dir(
        &self,
        dir: PathBuf,
        pending: &mut Vec<PathBuf>,
    ) -> StorageResult<Vec<ObjectMetadata>> {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
                continue;
            }

            if let Some(key) = self.key_for(&entry.path()) {
                objects.push(ObjectMetadata {
                    key,
                    size: metadata.len(),
                    last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        Ok(objects)
    }
}

async fn publish(staged: &Path, target: &Path) -> StorageResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(staged, target).await?;
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn bucket_exists(&self) -> StorageResult<bool> {
        match tokio::fs::metadata(&self.root).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_bucket(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let target = self.object_path(key)?;
        let (staged, mut file) = self.staging_file().await?;

        let written = async {
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;

        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }

        publish(&staged, &target).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.object_path(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(Box::pin(ReaderStream::new(file).map_err(StorageError::Io)))
    }

    async fn put_stream(
        &self,
        key: &str,
        _content_type: &str,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        let target = self.object_path(key)?;
        let (staged, file) = self.staging_file().await?;

        Ok(Box::new(LocalUpload {
            file,
            staged,
            target,
            bytes_written: 0,
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(&self, from: &str, to: &str, _content_type: &str) -> StorageResult<()> {
        let source = self.object_path(from)?;
        let target = self.object_path(to)?;

        tokio::fs::create_dir_all(&self.staging).await?;
        let staged = self.staging.join(Uuid::new_v4().simple().to_string());

        if let Err(e) = tokio::fs::copy(&source, &staged).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(if e.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound(from.to_string())
            } else {
                StorageError::Io(e)
            });
        }

        publish(&staged, &target).await
    }

    fn list(&self) -> ObjectStream<'_> {
        let start = vec![self.root.clone()];

        let pages = futures::stream::try_unfold(start, move |mut pending| async move {
            let Some(dir) = pending.pop() else {
                return Ok::<_, StorageError>(None);
            };
            let objects = self.scan_dir(dir, &mut pending).await?;
            Ok(Some((objects, pending)))
        });

        Box::pin(
            pages
                .map_ok(|objects| futures::stream::iter(objects.into_iter().map(Ok::<_, StorageError>)))
                .try_flatten(),
        )
    }
}

/// Streaming writer into a staging file
struct LocalUpload {
    file: tokio::fs::File,
    staged: PathBuf,
    target: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for LocalUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        self.file.sync_all().await?;
        drop(self.file);
        publish(&self.staged, &self.target).await?;
        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        drop(self.file);
        match tokio::fs::remove_file(&self.staged).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, LocalBlobStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path(), "uploads");
        store.ensure_bucket().await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, store) = store().await;

        store
            .put("a.bin", Bytes::from_static(b"hello"), "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(store.get("a.bin").await.unwrap(), Bytes::from_static(b"hello"));

        store.delete("a.bin").await.unwrap();
        assert!(matches!(
            store.get("a.bin").await,
            Err(StorageError::ObjectNotFound(_))
        ));

        // Deleting again is not an error
        store.delete("a.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = store().await;

        for key in ["../outside", "/etc/passwd", "", "a/../../b"] {
            let result = store.put(key, Bytes::new(), "text/plain").await;
            assert!(matches!(result, Err(StorageError::InvalidKey(_))), "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn test_streaming_upload_visible_only_after_finish() {
        let (_dir, store) = store().await;

        let mut upload = store.put_stream("merged.bin", "text/plain").await.unwrap();
        upload.write(Bytes::from_static(b"abc")).await.unwrap();
        upload.write(Bytes::from_static(b"def")).await.unwrap();

        assert!(store.list().try_collect::<Vec<_>>().await.unwrap().is_empty());

        assert_eq!(upload.finish().await.unwrap(), 6);
        assert_eq!(store.get("merged.bin").await.unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn test_aborted_upload_leaves_nothing() {
        let (_dir, store) = store().await;

        let mut upload = store.put_stream("merged.bin", "text/plain").await.unwrap();
        upload.write(Bytes::from_static(b"partial")).await.unwrap();
        upload.abort().await.unwrap();

        assert!(matches!(
            store.get("merged.bin").await,
            Err(StorageError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_copy_and_recursive_list() {
        let (_dir, store) = store().await;

        store.put("one.txt", Bytes::from_static(b"1"), "text/plain").await.unwrap();
        store.put("nested/two.txt", Bytes::from_static(b"22"), "text/plain").await.unwrap();
        store.copy("one.txt", "nested/deeper/three.txt", "text/plain").await.unwrap();

        let mut listed: Vec<_> = store
            .list()
            .map_ok(|obj| (obj.key, obj.size))
            .try_collect()
            .await
            .unwrap();
        listed.sort();

        assert_eq!(
            listed,
            vec![
                ("nested/deeper/three.txt".to_string(), 1),
                ("nested/two.txt".to_string(), 2),
                ("one.txt".to_string(), 1),
            ]
        );

        assert!(matches!(
            store.copy("missing.txt", "x.txt", "text/plain").await,
            Err(StorageError::ObjectNotFound(_))
        ));
    }
}
