//! Storage module for blob store backends
//!
//! Supports S3-compatible services (MinIO, AWS S3, R2), a local
//! filesystem directory, and a volatile in-memory store.

mod local;
mod memory;
mod s3_client;
mod traits;
mod types;

use std::sync::Arc;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use s3_client::S3BlobStore;
pub use traits::{BlobStore, ByteStream, ObjectStream, StreamingUpload};
pub use types::*;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageResult;

/// Build the configured blob store backend
pub async fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.backend {
        StorageBackend::S3 => Arc::new(S3BlobStore::new(config).await?),
        StorageBackend::Local => Arc::new(LocalBlobStore::new(&config.local_path, &config.bucket)),
        StorageBackend::Memory => Arc::new(MemoryBlobStore::new(&config.bucket)),
    };

    tracing::info!(
        backend = store.backend_name(),
        bucket = %store.bucket(),
        "Blob store configured"
    );

    Ok(store)
}
