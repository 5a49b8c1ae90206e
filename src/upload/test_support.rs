//! Blob store wrapper with switchable failures

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, Semaphore};

use crate::error::{StorageError, StorageResult};
use crate::storage::{BlobStore, ByteStream, MemoryBlobStore, ObjectStream, StreamingUpload};

/// In-memory store whose operations can be made to fail, or to stall
/// until released, on demand
pub struct FailingStore {
    inner: MemoryBlobStore,
    puts: AtomicBool,
    gets: AtomicBool,
    deletes: AtomicBool,
    copies: AtomicBool,
    held_puts: AtomicBool,
    held_gets: AtomicBool,
    entered: Notify,
    released: Semaphore,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryBlobStore::new("uploads"),
            puts: AtomicBool::new(false),
            gets: AtomicBool::new(false),
            deletes: AtomicBool::new(false),
            copies: AtomicBool::new(false),
            held_puts: AtomicBool::new(false),
            held_gets: AtomicBool::new(false),
            entered: Notify::new(),
            released: Semaphore::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryBlobStore {
        &self.inner
    }

    pub fn fail_puts(&self, fail: bool) {
        self.puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_copies(&self, fail: bool) {
        self.copies.store(fail, Ordering::SeqCst);
    }

    /// Stall every `put` until [`FailingStore::release`]
    pub fn hold_puts(&self) {
        self.held_puts.store(true, Ordering::SeqCst);
    }

    /// Stall every `get_stream` until [`FailingStore::release`]
    pub fn hold_gets(&self) {
        self.held_gets.store(true, Ordering::SeqCst);
    }

    /// Wait until an operation is stalled on a hold
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let stalled operations continue and stop holding new ones
    pub fn release(&self) {
        self.held_puts.store(false, Ordering::SeqCst);
        self.held_gets.store(false, Ordering::SeqCst);
        self.released.close();
    }

    async fn pause(&self, held: &AtomicBool) {
        if held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            // Closed on release
            let _ = self.released.acquire().await;
        }
    }
}

fn check(flag: &AtomicBool, op: &str) -> StorageResult<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StorageError::SdkError(format!("injected {} failure", op)));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FailingStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }

    async fn bucket_exists(&self) -> StorageResult<bool> {
        self.inner.bucket_exists().await
    }

    async fn create_bucket(&self) -> StorageResult<()> {
        self.inner.create_bucket().await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.pause(&self.held_puts).await;
        check(&self.puts, "put")?;
        self.inner.put(key, data, content_type).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.pause(&self.held_gets).await;
        check(&self.gets, "get")?;
        self.inner.get_stream(key).await
    }

    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        check(&self.puts, "put")?;
        self.inner.put_stream(key, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        check(&self.deletes, "delete")?;
        self.inner.delete(key).await
    }

    async fn copy(&self, from: &str, to: &str, content_type: &str) -> StorageResult<()> {
        check(&self.copies, "copy")?;
        self.inner.copy(from, to, content_type).await
    }

    fn list(&self) -> ObjectStream<'_> {
        self.inner.list()
    }
}
