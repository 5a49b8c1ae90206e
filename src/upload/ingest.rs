//! Chunk Ingestor
//!
//! Stores one chunk per call under `<objectName>.part<index>`. Retrying an
//! index overwrites the previous part, so clients may resend freely.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::{BlobStore, OCTET_STREAM};

use super::registry::SessionRegistry;
use super::types::ChunkUploadResponse;

/// Outcome of a stored chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub chunk_index: u32,
    pub uploaded_chunks: usize,
    pub total_chunks: u32,
}

impl From<ChunkReceipt> for ChunkUploadResponse {
    fn from(receipt: ChunkReceipt) -> Self {
        Self {
            success: true,
            chunk_index: receipt.chunk_index,
            uploaded_chunks: receipt.uploaded_chunks,
            total_chunks: receipt.total_chunks,
        }
    }
}

pub struct ChunkIngestor {
    store: Arc<dyn BlobStore>,
    registry: Arc<SessionRegistry>,
}

impl ChunkIngestor {
    pub fn new(store: Arc<dyn BlobStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Write chunk `chunk_index` of an upload and record its receipt
    pub async fn upload_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: u32,
        data: Bytes,
    ) -> Result<ChunkReceipt> {
        let session = self.registry.get(upload_id).await?;
        session.check_index(chunk_index)?;

        let len = data.len() as u64;
        if len > session.chunk_size {
            return Err(AppError::validation(format!(
                "chunk {} is {} bytes, larger than chunkSize {}",
                chunk_index, len, session.chunk_size
            )));
        }

        // Completion and cancellation take the gate exclusively and retire
        // the session before releasing it.
        let _gate = session.lock_shared().await;
        if session.is_retired() {
            return Err(AppError::upload_not_found(upload_id));
        }

        let key = session.part_key(chunk_index);
        self.store.put(&key, data, OCTET_STREAM).await?;

        let uploaded_chunks = session.mark_received(chunk_index, len);

        tracing::debug!(
            upload_id = %upload_id,
            chunk_index,
            size = len,
            uploaded_chunks,
            total_chunks = session.total_chunks,
            "Stored chunk"
        );

        Ok(ChunkReceipt {
            chunk_index,
            uploaded_chunks,
            total_chunks: session.total_chunks,
        })
    }
}

/// Parse the multipart `chunkIndex` field
pub fn parse_chunk_index(raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| AppError::validation(format!("invalid chunkIndex: {:?}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use crate::upload::test_support::FailingStore;

    fn setup() -> (Arc<MemoryBlobStore>, Arc<SessionRegistry>, ChunkIngestor) {
        let store = Arc::new(MemoryBlobStore::new("uploads"));
        let registry = Arc::new(SessionRegistry::default());
        let ingestor = ChunkIngestor::new(store.clone(), registry.clone());
        (store, registry, ingestor)
    }

    #[tokio::test]
    async fn test_chunks_in_any_order() {
        let (store, registry, ingestor) = setup();
        let session = registry.create("a.bin", 10, 4).await.unwrap();

        let receipt = ingestor
            .upload_chunk(session.id, 2, Bytes::from_static(b"IJ"))
            .await
            .unwrap();
        assert_eq!(
            receipt,
            ChunkReceipt {
                chunk_index: 2,
                uploaded_chunks: 1,
                total_chunks: 3
            }
        );

        ingestor
            .upload_chunk(session.id, 0, Bytes::from_static(b"ABCD"))
            .await
            .unwrap();

        assert_eq!(session.missing_chunks(), vec![1]);
        assert_eq!(
            store.get(&session.part_key(2)).await.unwrap(),
            Bytes::from_static(b"IJ")
        );
    }

    #[tokio::test]
    async fn test_retry_overwrites_part() {
        let (store, registry, ingestor) = setup();
        let session = registry.create("a.bin", 10, 4).await.unwrap();

        ingestor
            .upload_chunk(session.id, 1, Bytes::from_static(b"xxxx"))
            .await
            .unwrap();
        let receipt = ingestor
            .upload_chunk(session.id, 1, Bytes::from_static(b"EFGH"))
            .await
            .unwrap();

        assert_eq!(receipt.uploaded_chunks, 1);
        assert_eq!(
            store.get(&session.part_key(1)).await.unwrap(),
            Bytes::from_static(b"EFGH")
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_chunks() {
        let (store, registry, ingestor) = setup();
        let session = registry.create("a.bin", 10, 4).await.unwrap();

        assert!(matches!(
            ingestor.upload_chunk(session.id, 3, Bytes::from_static(b"AB")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ingestor.upload_chunk(session.id, 0, Bytes::from_static(b"ABCDE")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ingestor.upload_chunk(Uuid::new_v4(), 0, Bytes::from_static(b"AB")).await,
            Err(AppError::NotFound(_))
        ));

        assert!(store.keys().is_empty());
        assert_eq!(session.uploaded_chunks(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_session_unchanged() {
        let store = Arc::new(FailingStore::new());
        let registry = Arc::new(SessionRegistry::default());
        let ingestor = ChunkIngestor::new(store.clone(), registry.clone());
        let session = registry.create("a.bin", 10, 4).await.unwrap();

        store.fail_puts(true);
        assert!(matches!(
            ingestor.upload_chunk(session.id, 0, Bytes::from_static(b"ABCD")).await,
            Err(AppError::Storage(_))
        ));
        assert_eq!(session.uploaded_chunks(), 0);

        store.fail_puts(false);
        ingestor
            .upload_chunk(session.id, 0, Bytes::from_static(b"ABCD"))
            .await
            .unwrap();
        assert_eq!(session.uploaded_chunks(), 1);
    }

    #[tokio::test]
    async fn test_retired_session_rejects_chunks() {
        let (store, registry, ingestor) = setup();
        let session = registry.create("a.bin", 10, 4).await.unwrap();

        // Simulates a chunk request that looked the session up just before
        // a terminal operation retired it.
        session.retire();
        assert!(matches!(
            ingestor.upload_chunk(session.id, 0, Bytes::from_static(b"ABCD")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_parse_chunk_index() {
        assert_eq!(parse_chunk_index("0").unwrap(), 0);
        assert_eq!(parse_chunk_index(" 17 ").unwrap(), 17);
        for bad in ["", "-1", "one", "1.5"] {
            assert!(matches!(parse_chunk_index(bad), Err(AppError::Validation(_))));
        }
    }
}
