//! Completion Merger
//!
//! Produces the final object from the parts of a fully received upload,
//! in ascending chunk index order regardless of arrival order.
//!
//! A single-chunk upload is published with a store-side copy. Larger
//! uploads stream every part into one streaming writer, so memory stays
//! bounded by the part size rather than the file size. Nothing is
//! published unless every part was read and written; on failure the
//! session is handed back to the registry and the client may retry.

use std::sync::Arc;

use futures::TryStreamExt;
use uuid::Uuid;

use crate::error::{Result, StorageResult};
use crate::storage::{BlobStore, StreamingUpload};

use super::cancel::purge_parts;
use super::naming;
use super::registry::SessionRegistry;
use super::types::UploadSession;

/// A finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub upload_id: Uuid,
    pub file_name: String,
    pub object_name: String,
    pub size: u64,
}

#[derive(Clone)]
pub struct CompletionMerger {
    store: Arc<dyn BlobStore>,
    registry: Arc<SessionRegistry>,
}

impl CompletionMerger {
    pub fn new(store: Arc<dyn BlobStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Merge all parts of an upload into its final object
    pub async fn complete(&self, upload_id: Uuid) -> Result<CompletedUpload> {
        // An incomplete upload is reported without disturbing the session
        self.registry.get(upload_id).await?.ensure_complete()?;

        // Once claimed, the session only returns to the registry from this
        // task, so it must not be dropped with the caller's future.
        let merger = self.clone();
        tokio::spawn(async move { merger.merge(upload_id).await }).await?
    }

    async fn merge(&self, upload_id: Uuid) -> Result<CompletedUpload> {
        let session = self.registry.claim(upload_id).await?;
        let gate = session.lock_exclusive().await;

        let content_type = naming::content_type_for(&session.file_name);
        let merged = if session.total_chunks == 1 {
            self.store
                .copy(&session.part_key(0), &session.object_name, &content_type)
                .await
                .map(|()| session.received_bytes())
        } else {
            self.concatenate(&session, &content_type).await
        };

        let size = match merged {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(
                    upload_id = %upload_id,
                    object_name = %session.object_name,
                    error = %e,
                    "Merge failed, keeping session for retry"
                );
                drop(gate);
                self.registry.restore(session).await;
                return Err(e.into());
            }
        };

        if size != session.file_size {
            tracing::warn!(
                upload_id = %upload_id,
                object_name = %session.object_name,
                size,
                declared_size = session.file_size,
                "Merged size differs from the declared file size"
            );
        }

        session.retire();
        let parts = purge_parts(self.store.as_ref(), &session).await;
        drop(gate);

        tracing::info!(
            upload_id = %upload_id,
            object_name = %session.object_name,
            size,
            total_chunks = session.total_chunks,
            orphaned_parts = parts.failed,
            "Upload completed"
        );

        Ok(CompletedUpload {
            upload_id,
            file_name: session.file_name.clone(),
            object_name: session.object_name.clone(),
            size,
        })
    }

    /// Stream every part, in index order, into the final object
    async fn concatenate(&self, session: &UploadSession, content_type: &str) -> StorageResult<u64> {
        let mut upload = self
            .store
            .put_stream(&session.object_name, content_type)
            .await?;

        match self.copy_parts(session, upload.as_mut()).await {
            Ok(()) => upload.finish().await,
            Err(e) => {
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(
                        object_name = %session.object_name,
                        error = %abort_err,
                        "Failed to abort merge upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn copy_parts(
        &self,
        session: &UploadSession,
        upload: &mut dyn StreamingUpload,
    ) -> StorageResult<()> {
        for index in 0..session.total_chunks {
            let mut part = self.store.get_stream(&session.part_key(index)).await?;
            while let Some(bytes) = part.try_next().await? {
                upload.write(bytes).await?;
            }
        }
        Ok(())
    }
}
