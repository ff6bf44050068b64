//! Test helpers for integration tests.
//!
//! Provides sandboxes over the memory and local stores, seeding helpers,
//! and FlakyStore, a store wrapper that starts failing after a set number
//! of writes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use tempfile::TempDir;

use blobtree::store::ObjectStream;
use blobtree::{
    BlobTreeError, LocalStore, MemoryStore, ObjectInfo, ObjectReader, ObjectStore, PathSanitizer,
    Result, VirtualFs,
};

/// Sandbox root used by the tests.
pub const ROOT: &str = "input/";

/// A VirtualFs over a fresh in-memory store with a small listing page, so
/// pagination is exercised.
pub fn memory_vfs() -> (Arc<MemoryStore>, VirtualFs) {
    let store = Arc::new(MemoryStore::new().with_page_size(3));
    let vfs = VirtualFs::new(store.clone(), PathSanitizer::new(ROOT));
    (store, vfs)
}

/// A VirtualFs over a local store in a temporary directory.
pub fn local_vfs() -> (TempDir, VirtualFs) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LocalStore::new(temp_dir.path().join("blobs")).expect("Failed to create store");
    let vfs = VirtualFs::new(Arc::new(store), PathSanitizer::new(ROOT));
    (temp_dir, vfs)
}

/// Write each key with its own name as content.
pub async fn seed(store: &dyn ObjectStore, keys: &[&str]) {
    for key in keys {
        store
            .put(key, key.as_bytes().to_vec(), None)
            .await
            .expect("Failed to seed object");
    }
}

/// Every key under `prefix`, sorted.
pub async fn keys_under(store: &dyn ObjectStore, prefix: &str) -> Vec<String> {
    let mut keys: Vec<String> = store
        .list(prefix)
        .map_ok(|info| info.key)
        .try_collect()
        .await
        .expect("Failed to list keys");
    keys.sort();
    keys
}

/// Store wrapper that fails every write (put, copy, delete) once a budget
/// of successful writes is spent. Reads always pass through.
pub struct FlakyStore {
    inner: Arc<dyn ObjectStore>,
    budget: AtomicUsize,
}

impl FlakyStore {
    /// Allow `writes` successful writes, then fail.
    pub fn new(inner: Arc<dyn ObjectStore>, writes: usize) -> Self {
        Self {
            inner,
            budget: AtomicUsize::new(writes),
        }
    }

    /// Allow `writes` more successful writes.
    pub fn refill(&self, writes: usize) {
        self.budget.store(writes, Ordering::SeqCst);
    }

    fn spend(&self) -> Result<()> {
        self.budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .map(|_| ())
            .map_err(|_| BlobTreeError::Store("injected failure".to_string()))
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        self.spend()?;
        self.inner.put(key, data, content_type).await
    }

    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a> {
        self.inner.list(prefix)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.spend()?;
        self.inner.delete(key).await
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.spend()?;
        self.inner.copy(src, dst).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectInfo> {
        self.inner.metadata(key).await
    }

    async fn open_read(&self, key: &str) -> Result<ObjectReader> {
        self.inner.open_read(key).await
    }
}
