//! Catalog of finished objects
//!
//! Part keys of in-flight uploads are filtered out of every listing.

use std::sync::Arc;

use futures::{Stream, TryStreamExt};

use crate::error::{AppError, Result, StorageError, StorageResult};
use crate::storage::{BlobStore, ByteStream, ObjectMetadata};

use super::naming;

pub struct Catalog {
    store: Arc<dyn BlobStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Lazily list finished objects in store order. Each call starts a
    /// fresh listing.
    pub fn list(&self) -> impl Stream<Item = StorageResult<ObjectMetadata>> + Send + '_ {
        self.store
            .list()
            .try_filter(|obj| futures::future::ready(!naming::is_part_key(&obj.key)))
    }

    /// Collect the whole listing
    pub async fn list_all(&self) -> Result<Vec<ObjectMetadata>> {
        Ok(self.list().try_collect().await?)
    }

    /// Open a finished object for download
    pub async fn open(&self, object_name: &str) -> Result<ByteStream> {
        if naming::is_part_key(object_name) {
            return Err(AppError::NotFound(format!("object {}", object_name)));
        }
        self.store
            .get_stream(object_name)
            .await
            .map_err(|e| match e {
                StorageError::ObjectNotFound(key) => AppError::NotFound(format!("object {}", key)),
                e => e.into(),
            })
    }

    /// Delete a finished object
    pub async fn delete(&self, object_name: &str) -> Result<()> {
        if object_name.is_empty() {
            return Err(AppError::validation("objectName is required"));
        }

        self.store.delete(object_name).await?;
        tracing::info!(object_name = %object_name, "Deleted object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::storage::{MemoryBlobStore, OCTET_STREAM};

    async fn seeded() -> (Arc<MemoryBlobStore>, Catalog) {
        let store = Arc::new(MemoryBlobStore::new("uploads"));
        for key in [
            "1_movie.mp4",
            "2_big.iso.part0",
            "2_big.iso.part11",
            "3_my.party.txt",
        ] {
            store.put(key, Bytes::from_static(b"data"), OCTET_STREAM).await.unwrap();
        }
        let catalog = Catalog::new(store.clone());
        (store, catalog)
    }

    #[tokio::test]
    async fn test_list_excludes_parts() {
        let (_store, catalog) = seeded().await;

        let mut names: Vec<_> = catalog
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|obj| obj.key)
            .collect();
        names.sort();

        assert_eq!(names, vec!["1_movie.mp4", "3_my.party.txt"]);
    }

    #[tokio::test]
    async fn test_list_is_restartable() {
        let (_store, catalog) = seeded().await;

        let first = catalog.list_all().await.unwrap();
        let second = catalog.list_all().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, catalog) = seeded().await;

        catalog.delete("1_movie.mp4").await.unwrap();
        // Missing objects delete cleanly
        catalog.delete("1_movie.mp4").await.unwrap();

        assert!(!store.keys().contains(&"1_movie.mp4".to_string()));
        assert!(matches!(catalog.delete("").await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_open_hides_parts() {
        let (_store, catalog) = seeded().await;

        let body: Vec<Bytes> = catalog
            .open("1_movie.mp4")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(body.concat(), b"data");

        assert!(matches!(
            catalog.open("2_big.iso.part0").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            catalog.open("missing").await,
            Err(AppError::NotFound(_))
        ));
    }
}
