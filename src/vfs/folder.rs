//! Folder emulation: placeholders, subtree delete and subtree move.
//!
//! Neither delete nor move is atomic. Both process one object at a time
//! (with bounded concurrency) and report how far they got when the store
//! fails, so the caller can re-run the same request. A folder's own
//! placeholder is always handled last, which keeps a half-processed folder
//! visible in listings until everything else under it is done.

use futures::TryStreamExt;
use tracing::{debug, info};

use super::batch::Batch;
use crate::path::{PathSanitizer, VirtualPath};
use crate::store::ObjectStore;
use crate::{BlobTreeError, Result};

/// Default number of objects processed concurrently by bulk operations.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Creates, moves and deletes folder subtrees.
pub struct FolderManager<'a> {
    store: &'a dyn ObjectStore,
    sanitizer: &'a PathSanitizer,
    placeholder: &'a str,
    max_concurrency: usize,
}

impl<'a> FolderManager<'a> {
    /// Create a new FolderManager.
    pub fn new(
        store: &'a dyn ObjectStore,
        sanitizer: &'a PathSanitizer,
        placeholder: &'a str,
    ) -> Self {
        Self {
            store,
            sanitizer,
            placeholder,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Set how many objects bulk operations process at once.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Key of the placeholder object for `folder`.
    pub fn placeholder_key(&self, folder: &VirtualPath) -> String {
        format!("{}{}", folder.as_str(), self.placeholder)
    }

    /// Create a folder by writing its placeholder. Creating an existing
    /// folder rewrites the placeholder and succeeds.
    pub async fn create(&self, folder: &VirtualPath) -> Result<()> {
        self.ensure_inside(folder)?;
        if !folder.is_folder() {
            return Err(BlobTreeError::InvalidOperation(format!(
                "'{folder}' is not a folder path"
            )));
        }

        let key = self.placeholder_key(folder);
        self.store.put(&key, Vec::new(), None).await?;
        info!(folder = %folder, "folder created");
        Ok(())
    }

    /// Delete a file, or a folder and everything under it.
    ///
    /// Returns the number of objects removed.
    pub async fn delete_subtree(&self, path: &VirtualPath) -> Result<usize> {
        self.ensure_mutable(path)?;

        if path.is_file() {
            if !self.store.exists(path.as_str()).await? {
                return Err(BlobTreeError::NotFound(path.to_string()));
            }
            self.store.delete(path.as_str()).await?;
            info!(path = %path, "file deleted");
            return Ok(1);
        }

        let keys = self.keys_under(path).await?;
        if keys.is_empty() {
            return Err(BlobTreeError::NotFound(path.to_string()));
        }

        let own = self.placeholder_key(path);
        let total = keys.len();
        let (own_placeholder, others): (Vec<String>, Vec<String>) =
            keys.into_iter().partition(|key| *key == own);

        let store = self.store;
        let mut batch = Batch::new("delete", total, self.max_concurrency);
        batch
            .run(others, |key| async move {
                debug!(key = %key, "deleting object");
                store.delete(&key).await
            })
            .await?;
        if !own_placeholder.is_empty() {
            batch.step(store.delete(&own)).await?;
        }

        info!(path = %path, count = batch.completed(), "subtree deleted");
        Ok(batch.completed())
    }

    /// Validate a move without touching the store.
    pub fn check_move(&self, src: &VirtualPath, dst: &VirtualPath) -> Result<()> {
        self.ensure_mutable(src)?;
        if self.sanitizer.is_root(dst) {
            return Err(BlobTreeError::InvalidOperation(
                "cannot move onto the sandbox root".to_string(),
            ));
        }
        self.ensure_inside(dst)?;

        if src.is_folder() && dst.is_folder() && src.contains(dst) {
            return Err(BlobTreeError::InvalidOperation(format!(
                "cannot move folder '{src}' into itself ('{dst}')"
            )));
        }
        if src.is_folder() != dst.is_folder() {
            return Err(BlobTreeError::InvalidOperation(format!(
                "cannot move '{src}' to '{dst}': folders and files cannot be converted"
            )));
        }
        if src == dst {
            return Err(BlobTreeError::InvalidOperation(format!(
                "'{src}' is already at that path"
            )));
        }
        if dst.name() == self.placeholder {
            return Err(BlobTreeError::InvalidPath(format!(
                "'{}' is a reserved name",
                self.placeholder
            )));
        }
        Ok(())
    }

    /// Move a file or folder. Returns the number of objects moved.
    ///
    /// An existing destination file is overwritten; an existing destination
    /// folder is merged into.
    pub async fn rename_or_move(&self, src: &VirtualPath, dst: &VirtualPath) -> Result<usize> {
        self.check_move(src, dst)?;
        if src.is_file() {
            self.move_file(src, dst).await
        } else {
            self.move_folder(src, dst).await
        }
    }

    async fn move_file(&self, src: &VirtualPath, dst: &VirtualPath) -> Result<usize> {
        // Fails with NotFound before anything is written.
        self.store.metadata(src.as_str()).await?;
        self.store.copy(src.as_str(), dst.as_str()).await?;
        self.store.delete(src.as_str()).await?;
        info!(from = %src, to = %dst, "file moved");
        Ok(1)
    }

    async fn move_folder(&self, src: &VirtualPath, dst: &VirtualPath) -> Result<usize> {
        let keys = self.keys_under(src).await?;
        if keys.is_empty() {
            return Err(BlobTreeError::NotFound(src.to_string()));
        }

        let own = self.placeholder_key(src);
        let total = keys.len();
        let (own_placeholder, others): (Vec<String>, Vec<String>) =
            keys.into_iter().partition(|key| *key == own);

        let store = self.store;
        let from = src.as_str();
        let to = dst.as_str();
        let mut batch = Batch::new("move", total, self.max_concurrency);
        batch
            .run(others, |key| async move {
                let target = relocate(&key, from, to)?;
                debug!(from = %key, to = %target, "moving object");
                store.copy(&key, &target).await?;
                store.delete(&key).await
            })
            .await?;
        if !own_placeholder.is_empty() {
            let target = self.placeholder_key(dst);
            batch
                .step(async {
                    store.copy(&own, &target).await?;
                    store.delete(&own).await
                })
                .await?;
        }

        info!(from = %src, to = %dst, count = batch.completed(), "folder moved");
        Ok(batch.completed())
    }

    async fn keys_under(&self, prefix: &VirtualPath) -> Result<Vec<String>> {
        self.store
            .list(prefix.as_str())
            .map_ok(|info| info.key)
            .try_collect()
            .await
    }

    fn ensure_inside(&self, path: &VirtualPath) -> Result<()> {
        if self.sanitizer.contains_key(path.as_str()) {
            Ok(())
        } else {
            Err(BlobTreeError::InvalidOperation(format!(
                "'{path}' is outside the sandbox"
            )))
        }
    }

    /// Paths that may be deleted or moved: inside the sandbox, not the root.
    fn ensure_mutable(&self, path: &VirtualPath) -> Result<()> {
        if self.sanitizer.is_root(path) {
            return Err(BlobTreeError::InvalidOperation(
                "the sandbox root cannot be moved or deleted".to_string(),
            ));
        }
        // Placeholders are hidden from listings and only move with their folder.
        if path.is_file() && path.name() == self.placeholder {
            return Err(BlobTreeError::NotFound(path.to_string()));
        }
        self.ensure_inside(path)
    }
}

/// Swap the `from` prefix of `key` for `to`, keeping the remainder intact.
fn relocate(key: &str, from: &str, to: &str) -> Result<String> {
    key.strip_prefix(from)
        .map(|rest| format!("{to}{rest}"))
        .ok_or_else(|| BlobTreeError::store(format!("listed key '{key}' is outside '{from}'")))
}
