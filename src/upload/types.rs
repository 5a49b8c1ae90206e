//! Upload session state and request/response records

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::naming;

// ============================================================================
// Constants
// ============================================================================

/// Default cap on the number of chunks a single upload may declare
pub const DEFAULT_MAX_CHUNKS: u32 = 10_000;

/// Default request body limit on upload endpoints, which also caps `chunkSize`: 64 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Default session lifetime before the expiry sweep cancels it: 24 hours
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Upload Session
// ============================================================================

/// Server-side record of one resumable upload
///
/// Only the received-chunk map (index to byte length) changes after creation. The `gate` lets
/// chunk writes run in parallel (shared) while a completion or cancellation
/// holds it exclusively, so no chunk write can land after the parts have
/// been merged or purged. `retired` is set once a terminal operation has
/// consumed the session.
#[derive(Debug)]
pub struct UploadSession {
    pub id: Uuid,
    pub file_name: String,
    pub object_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub created_at: DateTime<Utc>,
    received: Mutex<BTreeMap<u32, u64>>,
    retired: AtomicBool,
    gate: RwLock<()>,
}

impl UploadSession {
    pub fn new(
        file_name: String,
        object_name: String,
        file_size: u64,
        chunk_size: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name,
            object_name,
            file_size,
            chunk_size,
            total_chunks: total_chunks(file_size, chunk_size),
            created_at,
            received: Mutex::new(BTreeMap::new()),
            retired: AtomicBool::new(false),
            gate: RwLock::new(()),
        }
    }

    /// Blob key for chunk `index`
    pub fn part_key(&self, index: u32) -> String {
        naming::part_key(&self.object_name, index)
    }

    /// Part keys for every index of the upload, received or not
    pub fn part_keys(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.total_chunks).map(move |index| self.part_key(index))
    }

    /// Number of distinct chunks received
    pub fn uploaded_chunks(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks() == self.total_chunks as usize
    }

    /// Indices not yet received, ascending
    pub fn missing_chunks(&self) -> Vec<u32> {
        let received = self.received.lock();
        (0..self.total_chunks)
            .filter(|index| !received.contains_key(index))
            .collect()
    }

    /// Percentage of chunks received
    pub fn progress(&self) -> f64 {
        percent(self.uploaded_chunks(), self.total_chunks)
    }

    /// Sum of the stored chunk lengths
    pub fn received_bytes(&self) -> u64 {
        self.received.lock().values().sum()
    }

    /// Reject an index outside `[0, total_chunks)`
    pub fn check_index(&self, index: u32) -> Result<()> {
        if index >= self.total_chunks {
            return Err(AppError::validation(format!(
                "chunkIndex {} out of range (totalChunks: {})",
                index, self.total_chunks
            )));
        }
        Ok(())
    }

    /// Conflict unless every chunk has been received
    pub fn ensure_complete(&self) -> Result<()> {
        let uploaded = self.uploaded_chunks();
        if uploaded != self.total_chunks as usize {
            return Err(AppError::Conflict {
                uploaded,
                total: self.total_chunks,
            });
        }
        Ok(())
    }

    /// Record receipt of `index`; returns the received count afterwards
    pub(crate) fn mark_received(&self, index: u32, len: u64) -> usize {
        let mut received = self.received.lock();
        received.insert(index, len);
        received.len()
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age >= ttl)
            .unwrap_or(false)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Held by chunk writes for the duration of the blob write
    pub(crate) async fn lock_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Held by completion and cancellation while they touch the parts
    pub(crate) async fn lock_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }
}

fn percent(uploaded: usize, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    uploaded as f64 / total as f64 * 100.0
}

/// `ceil(file_size / chunk_size)`
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u32 {
    let chunks = file_size.div_ceil(chunk_size.max(1));
    u32::try_from(chunks).unwrap_or(u32::MAX)
}

// ============================================================================
// Init Types
// ============================================================================

/// Request to start a chunked upload
///
/// Fields are optional so that missing values surface as validation errors
/// rather than deserialization failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitUploadRequest {
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub chunk_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: Uuid,
    pub object_name: String,
    pub total_chunks: u32,
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// Response after storing a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub chunk_index: u32,
    /// Distinct chunks received so far
    pub uploaded_chunks: usize,
    pub total_chunks: u32,
}

// ============================================================================
// Completion Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompleteUploadRequest {
    pub upload_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub success: bool,
    pub download_url: String,
    pub file_name: String,
    pub object_name: String,
    pub size: u64,
}

// ============================================================================
// Status / Cancel Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub upload_id: Uuid,
    pub file_name: String,
    pub object_name: String,
    pub uploaded_chunks: usize,
    pub total_chunks: u32,
    pub missing_chunks: Vec<u32>,
    /// Percentage, 0 to 100
    pub progress: f64,
}

impl From<&UploadSession> for UploadStatusResponse {
    fn from(session: &UploadSession) -> Self {
        let missing_chunks = session.missing_chunks();
        let uploaded_chunks = session.total_chunks as usize - missing_chunks.len();
        Self {
            upload_id: session.id,
            file_name: session.file_name.clone(),
            object_name: session.object_name.clone(),
            uploaded_chunks,
            total_chunks: session.total_chunks,
            missing_chunks,
            progress: percent(uploaded_chunks, session.total_chunks),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelUploadResponse {
    pub success: bool,
    pub message: String,
}

// ============================================================================
// Single Upload Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleUploadResponse {
    pub success: bool,
    pub file_name: String,
    pub object_name: String,
    pub download_url: String,
    pub size: u64,
}
