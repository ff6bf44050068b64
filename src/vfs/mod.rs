//! Virtual filesystem over a flat object store.
//!
//! [`VirtualFs`] is the entry point used by the command line and by
//! embedding applications. It turns raw user paths into sandboxed
//! [`VirtualPath`]s and hands them to the component that does the work:
//!
//! - [`HierarchicalLister`] for browsing
//! - [`FolderManager`] for folder creation, moves and deletes
//! - [`ArchiveExporter`] for archive downloads

mod batch;
mod entry;
mod export;
mod folder;
mod lister;

use std::path::PathBuf;
use std::sync::Arc;

use futures::TryStreamExt;
use tracing::{debug, info};

pub use entry::{sort_entries, VirtualEntry};
pub use export::{ArchiveExporter, ArchiveFormat, ArchiveStream, ExportOutcome};
pub use folder::{FolderManager, DEFAULT_MAX_CONCURRENCY};
pub use lister::HierarchicalLister;

use crate::config::Config;
use crate::path::{sanitize_name, PathSanitizer, VirtualPath};
use crate::store::{self, ObjectInfo, ObjectReader, ObjectStore};
use crate::{BlobTreeError, Result};

/// Default folder placeholder name.
pub const DEFAULT_PLACEHOLDER_NAME: &str = ".keep";

/// Default maximum upload size (200MB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 200 * 1024 * 1024;

/// Folder-and-file view of one sandbox in an object store.
#[derive(Clone)]
pub struct VirtualFs {
    store: Arc<dyn ObjectStore>,
    sanitizer: PathSanitizer,
    placeholder: String,
    max_concurrency: usize,
    max_upload_size: u64,
    export_format: ArchiveFormat,
    scratch_dir: Option<PathBuf>,
}

impl VirtualFs {
    /// Create a VirtualFs with default settings.
    pub fn new(store: Arc<dyn ObjectStore>, sanitizer: PathSanitizer) -> Self {
        Self {
            store,
            sanitizer,
            placeholder: DEFAULT_PLACEHOLDER_NAME.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            export_format: ArchiveFormat::default(),
            scratch_dir: None,
        }
    }

    /// Build the configured store and a VirtualFs over it.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = store::open(&config.storage)?;
        Ok(Self::with_store(store, config))
    }

    /// Create a VirtualFs over an existing store using the other
    /// configuration sections.
    pub fn with_store(store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        let sanitizer =
            PathSanitizer::new(&config.sandbox.root).with_policy(config.sandbox.traversal);
        Self::new(store, sanitizer)
            .with_placeholder(&config.sandbox.placeholder_name)
            .with_max_concurrency(config.transfer.max_concurrency)
            .with_max_upload_size(config.transfer.max_upload_size_bytes())
            .with_export_format(config.export.format)
            .with_scratch_dir(config.export.scratch_dir.clone())
    }

    /// Set the folder placeholder name.
    pub fn with_placeholder(mut self, name: impl Into<String>) -> Self {
        self.placeholder = name.into();
        self
    }

    /// Set how many objects bulk operations process at once.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Set the maximum upload size in bytes.
    pub fn with_max_upload_size(mut self, max_size: u64) -> Self {
        self.max_upload_size = max_size;
        self
    }

    /// Set the archive format used by [`export`](Self::export).
    pub fn with_export_format(mut self, format: ArchiveFormat) -> Self {
        self.export_format = format;
        self
    }

    /// Set where export scratch directories are created.
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// The underlying object store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The path sanitizer for this sandbox.
    pub fn sanitizer(&self) -> &PathSanitizer {
        &self.sanitizer
    }

    /// The folder placeholder name.
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Archive format used by exports.
    pub fn export_format(&self) -> ArchiveFormat {
        self.export_format
    }

    /// A lister over this sandbox's store.
    pub fn lister(&self) -> HierarchicalLister<'_> {
        HierarchicalLister::new(&*self.store, &self.placeholder)
    }

    /// A folder manager over this sandbox.
    pub fn folders(&self) -> FolderManager<'_> {
        FolderManager::new(&*self.store, &self.sanitizer, &self.placeholder)
            .with_max_concurrency(self.max_concurrency)
    }

    /// An exporter using this sandbox's settings.
    pub fn exporter(&self) -> ArchiveExporter<'_> {
        ArchiveExporter::new(&*self.store, &self.placeholder)
            .with_format(self.export_format)
            .with_scratch_dir(self.scratch_dir.as_deref())
            .with_max_concurrency(self.max_concurrency)
    }

    /// List a folder.
    pub async fn list(&self, prefix: &str, hierarchical: bool) -> Result<Vec<VirtualEntry>> {
        let folder = self.sanitizer.folder(prefix)?;
        self.lister().list(&folder, hierarchical).await
    }

    /// Create folder `name` inside `parent`. Returns the new folder path.
    pub async fn create_folder(&self, parent: &str, name: &str) -> Result<VirtualPath> {
        let name = self.checked_name(name)?;
        let parent = self.sanitizer.folder(parent)?;
        let folder = self.sanitizer.folder(&format!("{parent}{name}"))?;
        self.folders().create(&folder).await?;
        Ok(folder)
    }

    /// Store a file at `target_path`. Returns the object key.
    pub async fn upload_file(
        &self,
        target_path: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String> {
        if data.len() as u64 > self.max_upload_size {
            return Err(BlobTreeError::TooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                data.len(),
                self.max_upload_size
            )));
        }

        let path = self.sanitizer.file(target_path)?;
        if self.sanitizer.is_root(&path) {
            return Err(BlobTreeError::InvalidOperation(
                "cannot upload onto the sandbox root".to_string(),
            ));
        }
        if path.name() == self.placeholder {
            return Err(BlobTreeError::InvalidPath(format!(
                "'{}' is a reserved name",
                self.placeholder
            )));
        }

        let size = data.len();
        self.store.put(path.as_str(), data, content_type).await?;
        info!(key = %path, size, "file uploaded");
        Ok(path.into_string())
    }

    /// Rename a file or folder in place. Returns the new path.
    pub async fn rename(&self, path: &str, new_name: &str) -> Result<VirtualPath> {
        let name = self.checked_name(new_name)?;
        let src = self.resolve(self.sanitizer.path(path)?).await?;
        let target = format!("{}{}", src.parent_prefix(), name);
        let dst = if src.is_folder() {
            self.sanitizer.folder(&target)?
        } else {
            self.sanitizer.file(&target)?
        };
        self.folders().rename_or_move(&src, &dst).await?;
        Ok(dst)
    }

    /// Move a file or folder to another path. Returns the destination.
    ///
    /// A trailing slash marks a folder path. A source given without one
    /// that names a folder is treated as a folder, and so is its
    /// destination.
    pub async fn move_path(&self, src: &str, dst: &str) -> Result<VirtualPath> {
        let given = self.sanitizer.path(src)?;
        let src = self.resolve(given.clone()).await?;
        let dst = if src != given {
            self.sanitizer.folder(dst)?
        } else {
            self.sanitizer.path(dst)?
        };
        self.folders().rename_or_move(&src, &dst).await?;
        Ok(dst)
    }

    /// Delete a file or a folder subtree. Returns the number of objects
    /// removed.
    pub async fn delete(&self, path: &str) -> Result<usize> {
        let path = self.resolve(self.sanitizer.path(path)?).await?;
        self.folders().delete_subtree(&path).await
    }

    /// Export a folder subtree as an archive.
    ///
    /// Only folders are exported: a path naming a single stored file (and
    /// nothing below it) is `NotFound`.
    pub async fn export(&self, prefix: &str) -> Result<ExportOutcome> {
        let given = self.sanitizer.path(prefix)?;
        let folder = self.sanitizer.folder(prefix)?;
        if given.is_file()
            && self.store.exists(given.as_str()).await?
            && !self.has_children(&folder).await?
        {
            return Err(BlobTreeError::NotFound(format!("folder '{folder}'")));
        }
        self.exporter().export(&folder).await
    }

    /// Metadata for one file.
    pub async fn stat(&self, path: &str) -> Result<ObjectInfo> {
        let path = self.visible_file(path)?;
        self.store.metadata(path.as_str()).await
    }

    /// Open a file for reading.
    pub async fn open_file(&self, path: &str) -> Result<(ObjectInfo, ObjectReader)> {
        let path = self.visible_file(path)?;
        let info = self.store.metadata(path.as_str()).await?;
        let reader = self.store.open_read(path.as_str()).await?;
        Ok((info, reader))
    }

    /// A sanitized name that is not the reserved placeholder name.
    fn checked_name(&self, raw: &str) -> Result<String> {
        let name = sanitize_name(raw)?;
        if name == self.placeholder {
            return Err(BlobTreeError::InvalidPath(format!(
                "'{}' is a reserved name",
                self.placeholder
            )));
        }
        Ok(name)
    }

    /// A file path that listings would show. Placeholders are hidden.
    fn visible_file(&self, raw: &str) -> Result<VirtualPath> {
        let path = self.sanitizer.file(raw)?;
        if path.name() == self.placeholder {
            return Err(BlobTreeError::NotFound(path.into_string()));
        }
        Ok(path)
    }

    /// Treat a file path that has no object of its own, but does have
    /// objects under it, as the folder it names.
    async fn resolve(&self, path: VirtualPath) -> Result<VirtualPath> {
        if path.is_folder() || self.store.exists(path.as_str()).await? {
            return Ok(path);
        }
        let folder = self.sanitizer.folder(path.as_str())?;
        if self.has_children(&folder).await? {
            debug!(path = %path, "resolved as folder");
            return Ok(folder);
        }
        Ok(path)
    }

    async fn has_children(&self, folder: &VirtualPath) -> Result<bool> {
        Ok(self.store.list(folder.as_str()).try_next().await?.is_some())
    }
}
