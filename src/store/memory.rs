//! In-memory object store.
//!
//! Keys live in an ordered map. Listing hands out fixed-size pages resumed
//! from the last key seen, the same way a remote store pages through a
//! continuation token.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::RwLock;

use super::{ObjectInfo, ObjectReader, ObjectStore, ObjectStream};
use crate::{BlobTreeError, Result};

/// Default number of keys per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            last_modified: self.last_modified,
            content_type: self.content_type.clone(),
        }
    }
}

/// Object store held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the listing page size (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// All keys, in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Up to one page of objects under `prefix`, strictly after `after`
    /// (or from the start of the prefix when `after` is `None`).
    fn page(&self, prefix: &str, after: Option<&str>) -> Vec<ObjectInfo> {
        let objects = self.objects.read();
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(self.page_size)
            .map(|(key, object)| object.info(key))
            .collect()
    }

    fn get(&self, key: &str) -> Result<StoredObject> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobTreeError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let object = StoredObject {
            data: Arc::new(data),
            content_type: content_type.map(str::to_string),
            last_modified: Utc::now(),
        };
        self.objects.write().insert(key.to_string(), object);
        Ok(())
    }

    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a> {
        // State: `None` once the last page has been handed out, otherwise
        // the cursor to resume from.
        stream::try_unfold(Some(None::<String>), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok::<_, BlobTreeError>(None);
            };
            let page = self.page(prefix, after.as_deref());
            if page.is_empty() {
                return Ok(None);
            }
            let next = if page.len() < self.page_size {
                None
            } else {
                page.last().map(|o| Some(o.key.clone()))
            };
            Ok(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, BlobTreeError>)))
        .try_flatten()
        .boxed()
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let mut object = self.get(src)?;
        object.last_modified = Utc::now();
        self.objects.write().insert(dst.to_string(), object);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn metadata(&self, key: &str) -> Result<ObjectInfo> {
        Ok(self.get(key)?.info(key))
    }

    async fn open_read(&self, key: &str) -> Result<ObjectReader> {
        let object = self.get(key)?;
        Ok(Box::new(Cursor::new(object.data.as_ref().clone())))
    }
}
