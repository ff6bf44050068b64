//! Object store abstraction.
//!
//! The store is a flat key/value space with no notion of folders. Every
//! folder behaviour in this crate is built on top of the operations below.

mod local;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

pub use local::LocalStore;
pub use memory::{MemoryStore, DEFAULT_PAGE_SIZE};

use crate::config::StorageConfig;
use crate::{BlobTreeError, Result};

/// Readable body of a stored object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lazy, finite sequence of listed objects. Not restartable.
pub type ObjectStream<'a> = BoxStream<'a, Result<ObjectInfo>>;

/// What the store knows about one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Content type, when the store records one.
    pub content_type: Option<String>,
}

/// Client for a flat, key-addressed object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing object at `key`.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<()>;

    /// Enumerate every object whose key starts with `prefix`.
    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a>;

    /// Delete an object. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Copy `src` to `dst`.
    ///
    /// The default reads the source and writes it back; stores with a
    /// native copy should override this.
    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let meta = self.metadata(src).await?;
        let mut reader = self.open_read(src).await?;
        let mut data = Vec::with_capacity(meta.size as usize);
        reader
            .read_to_end(&mut data)
            .await
            .map_err(BlobTreeError::store)?;
        self.put(dst, data, meta.content_type.as_deref()).await
    }

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.metadata(key).await {
            Ok(_) => Ok(true),
            Err(BlobTreeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch metadata for one object. Returns `NotFound` when absent.
    async fn metadata(&self, key: &str) -> Result<ObjectInfo>;

    /// Open an object for reading. Returns `NotFound` when absent.
    async fn open_read(&self, key: &str) -> Result<ObjectReader>;
}

/// Which store implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Objects as files under a local directory.
    #[default]
    Local,
    /// Objects in process memory (lost on exit).
    Memory,
}

/// Build the store described by the configuration.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::Local => {
            if config.root.is_empty() {
                return Err(BlobTreeError::Config(
                    "storage.root is required for the local backend".to_string(),
                ));
            }
            Arc::new(LocalStore::new(&config.root)?)
        }
        StorageBackend::Memory => {
            Arc::new(MemoryStore::new().with_page_size(config.list_page_size))
        }
    };
    tracing::debug!(backend = ?config.backend, root = %config.root, "object store ready");
    Ok(store)
}
