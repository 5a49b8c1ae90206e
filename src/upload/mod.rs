//! Resumable Chunked Upload Module
//!
//! Coordinates large uploads split into indexed chunks:
//! - Session registry with claim-by-removal for terminal operations
//! - Chunk ingestion in any order, with idempotent retries
//! - Ordered streaming merge into the final object
//! - Cancellation and periodic expiry of abandoned sessions
//!
//! Protocol Flow:
//! 1. Client declares file name, size and chunk size (init)
//! 2. Client uploads chunks, in any order and concurrently
//! 3. Client polls status and re-sends missing chunks
//! 4. Client calls complete, or cancel at any point before that

pub mod cancel;
pub mod catalog;
pub mod ingest;
pub mod merge;
pub mod naming;
pub mod registry;
pub mod single;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

pub use cancel::{CancellationHandler, CancelledUpload, PurgeReport};
pub use catalog::Catalog;
pub use ingest::{parse_chunk_index, ChunkIngestor, ChunkReceipt};
pub use merge::{CompletedUpload, CompletionMerger};
pub use registry::{SessionLimits, SessionRegistry};
pub use single::{SingleUploader, StoredFile};
pub use types::*;

/// Entry point for every upload operation
pub struct UploadService {
    registry: Arc<SessionRegistry>,
    ingestor: ChunkIngestor,
    merger: CompletionMerger,
    canceller: Arc<CancellationHandler>,
    catalog: Catalog,
    single: SingleUploader,
}

impl UploadService {
    pub fn new(store: Arc<dyn BlobStore>, limits: SessionLimits) -> Self {
        let registry = Arc::new(SessionRegistry::new(limits));

        Self {
            ingestor: ChunkIngestor::new(store.clone(), registry.clone()),
            merger: CompletionMerger::new(store.clone(), registry.clone()),
            canceller: Arc::new(CancellationHandler::new(store.clone(), registry.clone())),
            catalog: Catalog::new(store.clone()),
            single: SingleUploader::new(store),
            registry,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Start a chunked upload
    pub async fn init(&self, request: InitUploadRequest) -> Result<Arc<UploadSession>> {
        let (Some(file_name), Some(file_size), Some(chunk_size)) =
            (request.file_name, request.file_size, request.chunk_size)
        else {
            return Err(AppError::validation(
                "missing required parameters: fileName, fileSize, chunkSize",
            ));
        };

        self.registry.create(&file_name, file_size, chunk_size).await
    }

    pub async fn upload_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: u32,
        data: Bytes,
    ) -> Result<ChunkReceipt> {
        self.ingestor.upload_chunk(upload_id, chunk_index, data).await
    }

    pub async fn complete(&self, upload_id: Uuid) -> Result<CompletedUpload> {
        self.merger.complete(upload_id).await
    }

    pub async fn cancel(&self, upload_id: Uuid) -> Result<CancelledUpload> {
        self.canceller.cancel(upload_id).await
    }

    /// Snapshot of a live upload's progress
    pub async fn status(&self, upload_id: Uuid) -> Result<UploadStatusResponse> {
        let session = self.registry.get(upload_id).await?;
        Ok(UploadStatusResponse::from(session.as_ref()))
    }

    pub async fn upload_single(&self, file_name: &str, data: Bytes) -> Result<StoredFile> {
        self.single.upload(file_name, data).await
    }

    /// Spawn the background sweep that cancels sessions older than `ttl`
    pub fn start_sweep_task(&self, ttl: Duration, every: Duration) -> tokio::task::JoinHandle<()> {
        tracing::info!(
            ttl_secs = ttl.as_secs(),
            interval_secs = every.as_secs(),
            "Starting upload expiry sweep"
        );
        Arc::clone(&self.canceller).start_sweep_task(ttl, every)
    }
}
