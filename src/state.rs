//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::storage::BlobStore;
use crate::upload::{SessionLimits, UploadService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn BlobStore>,
    uploads: UploadService,
}

impl AppState {
    /// Create the application state around a connected blob store
    pub fn new(config: Config, store: Arc<dyn BlobStore>) -> Self {
        let limits = SessionLimits {
            max_chunks: config.upload.max_chunks,
            max_chunk_size: config.upload.max_body_bytes as u64,
        };
        let uploads = UploadService::new(store.clone(), limits);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                uploads,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the blob store
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.inner.store
    }

    /// Get the upload coordinator
    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }

    /// Public URL for a finished object
    pub fn download_url(&self, object_name: &str) -> String {
        self.inner.config.storage.download_url(object_name)
    }
}
