//! Session Registry
//!
//! Owns every live upload session. Structural changes (insert, remove)
//! go through one registry-wide lock; each session serializes its own
//! received-chunk bookkeeping, so chunk writes for different sessions
//! never contend.
//!
//! Terminal operations take ownership with [`SessionRegistry::claim`],
//! which removes the entry atomically. A second completion or a
//! cancellation racing the first sees `NotFound` instead of merging or
//! purging the same parts twice. A failed terminal operation puts the
//! session back with [`SessionRegistry::restore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::naming;
use super::types::{UploadSession, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CHUNKS};

/// Per-upload limits enforced at init
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_chunks: u32,
    /// A chunk travels in one request, so it cannot exceed the body limit
    pub max_chunk_size: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_chunks: DEFAULT_MAX_CHUNKS,
            max_chunk_size: DEFAULT_MAX_BODY_BYTES as u64,
        }
    }
}

/// Registry of live upload sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<UploadSession>>>,
    limits: SessionLimits,
}

impl SessionRegistry {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// Parse a client-supplied upload id. Malformed ids cannot name a
    /// session, so they are reported as not found.
    pub fn parse_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw.trim()).map_err(|_| AppError::upload_not_found(raw))
    }

    /// Validate the declared file and register a new session
    pub async fn create(
        &self,
        file_name: &str,
        file_size: i64,
        chunk_size: i64,
    ) -> Result<Arc<UploadSession>> {
        let file_name = naming::sanitize_file_name(file_name)?;

        let file_size = positive("fileSize", file_size)?;
        let chunk_size = positive("chunkSize", chunk_size)?;

        if chunk_size > self.limits.max_chunk_size {
            return Err(AppError::validation(format!(
                "chunkSize {} exceeds the {} byte request limit",
                chunk_size, self.limits.max_chunk_size
            )));
        }

        let total = file_size.div_ceil(chunk_size);
        if total > u64::from(self.limits.max_chunks) {
            return Err(AppError::validation(format!(
                "upload needs {} chunks, limit is {}",
                total, self.limits.max_chunks
            )));
        }

        let mut sessions = self.sessions.write().await;

        // Two sessions for the same file name in the same millisecond would
        // share part keys; step the timestamp until the name is free.
        let mut created_at = Utc::now();
        let mut object_name = naming::object_name(created_at, &file_name);
        while sessions.values().any(|s| s.object_name == object_name) {
            created_at += chrono::Duration::milliseconds(1);
            object_name = naming::object_name(created_at, &file_name);
        }

        let session = Arc::new(UploadSession::new(
            file_name,
            object_name,
            file_size,
            chunk_size,
            created_at,
        ));
        sessions.insert(session.id, Arc::clone(&session));

        tracing::info!(
            upload_id = %session.id,
            file_name = %session.file_name,
            object_name = %session.object_name,
            file_size,
            chunk_size,
            total_chunks = session.total_chunks,
            "Created upload session"
        );

        Ok(session)
    }

    /// Look up a live session
    pub async fn get(&self, id: Uuid) -> Result<Arc<UploadSession>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::upload_not_found(id))
    }

    /// Take exclusive ownership of a session for a terminal operation
    pub async fn claim(&self, id: Uuid) -> Result<Arc<UploadSession>> {
        self.remove(id)
            .await
            .ok_or_else(|| AppError::upload_not_found(id))
    }

    /// Return a claimed session after its terminal operation failed
    pub async fn restore(&self, session: Arc<UploadSession>) {
        if session.is_retired() {
            return;
        }
        tracing::debug!(upload_id = %session.id, "Restoring upload session");
        self.sessions.write().await.insert(session.id, session);
    }

    /// Remove a session. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: Uuid) -> Option<Arc<UploadSession>> {
        self.sessions.write().await.remove(&id)
    }

    /// Ids of sessions created more than `ttl` ago
    pub async fn expired(&self, ttl: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired(ttl, now))
            .map(|s| s.id)
            .collect()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}

fn positive(field: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| AppError::validation(format!("{} must be positive, got {}", field, value)))
}
