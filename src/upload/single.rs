//! Single-request uploads that bypass the session machinery

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use crate::error::Result;
use crate::storage::BlobStore;

use super::naming;

/// A file stored in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub object_name: String,
    pub size: u64,
}

pub struct SingleUploader {
    store: Arc<dyn BlobStore>,
}

impl SingleUploader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Store `data` under a timestamped name derived from `file_name`
    pub async fn upload(&self, file_name: &str, data: Bytes) -> Result<StoredFile> {
        let file_name = naming::sanitize_file_name(file_name)?;
        let object_name = naming::object_name(Utc::now(), &file_name);
        let size = data.len() as u64;

        self.store
            .put(&object_name, data, &naming::content_type_for(&file_name))
            .await?;

        tracing::info!(object_name = %object_name, size, "Stored single upload");

        Ok(StoredFile {
            file_name,
            object_name,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::storage::MemoryBlobStore;

    #[tokio::test]
    async fn test_single_upload() {
        let store = Arc::new(MemoryBlobStore::new("uploads"));
        let uploader = SingleUploader::new(store.clone());

        let stored = uploader
            .upload("photos/cat.png", Bytes::from_static(b"\x89PNG"))
            .await
            .unwrap();

        assert_eq!(stored.file_name, "cat.png");
        assert!(stored.object_name.ends_with("_cat.png"));
        assert_eq!(stored.size, 4);
        assert_eq!(store.content_type(&stored.object_name).as_deref(), Some("image/png"));
        assert_eq!(
            store.get(&stored.object_name).await.unwrap(),
            Bytes::from_static(b"\x89PNG")
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_names() {
        let uploader = SingleUploader::new(Arc::new(MemoryBlobStore::new("uploads")));

        for name in ["", "..", "video.mp4.part3"] {
            assert!(matches!(
                uploader.upload(name, Bytes::from_static(b"x")).await,
                Err(AppError::Validation(_))
            ));
        }
    }
}
