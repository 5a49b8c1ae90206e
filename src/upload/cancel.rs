//! Cancellation Handler
//!
//! Deletes every part key of an upload, received or not, and retires the
//! session. Part deletion is best-effort: failures are logged and counted
//! but never fail the cancellation. The expiry sweep reuses the same path
//! for sessions that outlived their TTL.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::BlobStore;

use super::registry::SessionRegistry;
use super::types::UploadSession;

/// Concurrent deletes issued while purging parts
const PURGE_CONCURRENCY: usize = 16;

/// Counts from a best-effort part purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Delete every part key of `session`, logging failures
pub(crate) async fn purge_parts(store: &dyn BlobStore, session: &UploadSession) -> PurgeReport {
    futures::stream::iter(session.part_keys())
        .map(|key| async move {
            let result = store.delete(&key).await;
            (key, result)
        })
        .buffer_unordered(PURGE_CONCURRENCY)
        .fold(PurgeReport::default(), |mut report, (key, result)| async move {
            match result {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(
                        upload_id = %session.id,
                        key = %key,
                        error = %e,
                        "Failed to delete chunk part"
                    );
                    report.failed += 1;
                }
            }
            report
        })
        .await
}

/// Result of a cancellation
#[derive(Debug, Clone)]
pub struct CancelledUpload {
    pub upload_id: Uuid,
    pub object_name: String,
    pub parts: PurgeReport,
}

#[derive(Clone)]
pub struct CancellationHandler {
    store: Arc<dyn BlobStore>,
    registry: Arc<SessionRegistry>,
}

impl CancellationHandler {
    pub fn new(store: Arc<dyn BlobStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Cancel a live upload
    pub async fn cancel(&self, upload_id: Uuid) -> Result<CancelledUpload> {
        // Claim and purge run detached so a dropped request cannot leave the
        // session claimed with its parts still stored.
        let handler = self.clone();
        tokio::spawn(async move { handler.cancel_claimed(upload_id).await }).await?
    }

    async fn cancel_claimed(&self, upload_id: Uuid) -> Result<CancelledUpload> {
        let session = self.registry.claim(upload_id).await?;
        let cancelled = self.discard(session).await;

        tracing::info!(
            upload_id = %upload_id,
            object_name = %cancelled.object_name,
            parts_deleted = cancelled.parts.deleted,
            parts_failed = cancelled.parts.failed,
            "Upload cancelled"
        );

        Ok(cancelled)
    }

    /// Cancel every session older than `ttl`
    ///
    /// Returns the number of sessions removed
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut count = 0;

        for id in self.registry.expired(ttl).await {
            // Completed or cancelled since the scan
            let Ok(session) = self.registry.claim(id).await else {
                continue;
            };

            let expired = self.discard(session).await;
            tracing::debug!(
                upload_id = %id,
                object_name = %expired.object_name,
                parts_failed = expired.parts.failed,
                "Expired upload session"
            );
            count += 1;
        }

        if count > 0 {
            tracing::info!(count, "Cleaned up expired upload sessions");
        }

        count
    }

    /// Spawn the periodic expiry sweep
    pub fn start_sweep_task(
        self: Arc<Self>,
        ttl: Duration,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                self.sweep_expired(ttl).await;
            }
        })
    }

    /// Retire a claimed session and purge its parts
    async fn discard(&self, session: Arc<UploadSession>) -> CancelledUpload {
        // Waits for in-flight chunk writes; later ones see the session retired
        let _gate = session.lock_exclusive().await;
        session.retire();

        let parts = purge_parts(self.store.as_ref(), &session).await;

        CancelledUpload {
            upload_id: session.id,
            object_name: session.object_name.clone(),
            parts,
        }
    }
}
