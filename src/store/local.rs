//! Object store backed by a local directory.
//!
//! Each key is one file under the base directory:
//! ```text
//! {base_path}/
//! ├── input/
//! │   ├── .keep
//! │   └── reports/
//! │       └── q1.csv        <- key "input/reports/q1.csv"
//! └── output/
//!     └── ...
//! ```
//! Directories are created on demand and pruned when they become empty, so
//! the directory tree never says more than the keys do.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::fs;

use super::{ObjectInfo, ObjectReader, ObjectStore, ObjectStream};
use crate::{BlobTreeError, Result};

/// Object store that keeps objects as files under a base directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    /// Create a LocalStore rooted at the given directory.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this store.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a key onto a file path, refusing keys that would leave the base
    /// directory or that cannot name a file.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.ends_with('/') {
            return Err(BlobTreeError::Store(format!(
                "key '{key}' cannot be stored as a file"
            )));
        }
        let mut path = self.base_path.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(BlobTreeError::Store(format!(
                    "key '{key}' has an unsupported segment"
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Inverse of [`object_path`](Self::object_path).
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_str()?),
                _ => return None,
            }
        }
        Some(segments.join("/"))
    }

    /// Remove empty directories from `dir` upwards, stopping at the base.
    async fn prune_empty_dirs(&self, mut dir: PathBuf) {
        while dir != self.base_path && dir.starts_with(&self.base_path) {
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            if !dir.pop() {
                break;
            }
        }
    }

    /// Objects directly inside `dir` whose keys start with `prefix`.
    /// Subdirectories that may hold matching keys are pushed onto `pending`.
    async fn read_dir_page(
        &self,
        dir: &Path,
        prefix: &str,
        pending: &mut Vec<PathBuf>,
    ) -> Result<Vec<ObjectInfo>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BlobTreeError::store(e)),
        };

        let mut page = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(BlobTreeError::store)? {
            let path = entry.path();
            let Some(key) = self.key_for(&path) else {
                continue;
            };
            let file_type = entry.file_type().await.map_err(BlobTreeError::store)?;
            if file_type.is_dir() {
                if dir_may_match(&format!("{key}/"), prefix) {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() || !key.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata().await.map_err(BlobTreeError::store)?;
            let last_modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            page.push(ObjectInfo {
                key,
                size: meta.len(),
                last_modified,
                content_type: None,
            });
        }

        page.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(page)
    }

    fn not_found_or_store(key: &str, err: io::Error) -> BlobTreeError {
        if err.kind() == io::ErrorKind::NotFound {
            BlobTreeError::NotFound(key.to_string())
        } else {
            BlobTreeError::store(format!("{key}: {err}"))
        }
    }
}

/// Whether a directory with key prefix `dir_key` (ending in `/`) could hold
/// keys starting with `prefix`.
fn dir_may_match(dir_key: &str, prefix: &str) -> bool {
    dir_key.starts_with(prefix) || prefix.starts_with(dir_key)
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: Option<&str>) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobTreeError::store(format!("{key}: {e}")))?;
        }
        fs::write(&path, data)
            .await
            .map_err(|e| BlobTreeError::store(format!("{key}: {e}")))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a> {
        // Start from the deepest directory the prefix fully names.
        let start = match prefix.rfind('/') {
            Some(idx) => match self.object_path(&prefix[..idx]) {
                Ok(path) => path,
                Err(_) => return stream::empty().boxed(),
            },
            None => self.base_path.clone(),
        };

        // One directory per step; each step yields that directory's files.
        stream::try_unfold(vec![start], move |mut pending| async move {
            while let Some(dir) = pending.pop() {
                let page = self.read_dir_page(&dir, prefix, &mut pending).await?;
                if !page.is_empty() {
                    return Ok(Some((page, pending)));
                }
            }
            Ok::<_, BlobTreeError>(None)
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, BlobTreeError>)))
        .try_flatten()
        .boxed()
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BlobTreeError::store(format!("{key}: {e}"))),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent.to_path_buf()).await;
        }
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let from = self.object_path(src)?;
        let to = self.object_path(dst)?;
        if !fs::metadata(&from)
            .await
            .map_err(|e| Self::not_found_or_store(src, e))?
            .is_file()
        {
            return Err(BlobTreeError::NotFound(src.to_string()));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobTreeError::store(format!("{dst}: {e}")))?;
        }
        fs::copy(&from, &to)
            .await
            .map_err(|e| Self::not_found_or_store(src, e))?;
        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<ObjectInfo> {
        let path = self.object_path(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_store(key, e))?;
        if !meta.is_file() {
            return Err(BlobTreeError::NotFound(key.to_string()));
        }
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            last_modified,
            content_type: None,
        })
    }

    async fn open_read(&self, key: &str) -> Result<ObjectReader> {
        let path = self.object_path(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found_or_store(key, e))?;
        Ok(Box::new(file))
    }
}
