//! Subtree export as a single streamed archive.
//!
//! The store cannot be handed to an archiver directly, so the subtree is
//! first downloaded into a scratch directory and an external archiver
//! (`zip` or `tar`) runs inside it, its stdout becoming the export stream.
//! The scratch directory belongs to the [`ArchiveStream`] and is removed
//! exactly once: at end of stream, on a read error, or when the stream is
//! dropped.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use serde::Deserialize;
use tempfile::TempDir;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::batch::Batch;
use super::folder::DEFAULT_MAX_CONCURRENCY;
use super::lister::HierarchicalLister;
use crate::path::VirtualPath;
use crate::store::ObjectStore;
use crate::{BlobTreeError, Result};

/// Archive container produced by an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// `.zip`, produced by `zip`.
    #[default]
    Zip,
    /// `.tar.gz`, produced by `tar`.
    TarGz,
}

impl ArchiveFormat {
    /// File extension, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    /// MIME type of the archive.
    pub fn content_type(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "application/zip",
            ArchiveFormat::TarGz => "application/gzip",
        }
    }

    /// Archiver invocation that writes the current directory to stdout.
    fn command(&self) -> Command {
        let mut command = match self {
            ArchiveFormat::Zip => {
                let mut command = Command::new("zip");
                command.args(["-q", "-r", "-", "."]);
                command
            }
            ArchiveFormat::TarGz => {
                let mut command = Command::new("tar");
                command.args(["-czf", "-", "."]);
                command
            }
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Result of an export request.
#[derive(Debug)]
pub enum ExportOutcome {
    /// Nothing under the prefix to export. No archive was started.
    Empty,
    /// An archive is streaming.
    Archive {
        /// The archive bytes.
        stream: ArchiveStream,
        /// Number of files in the archive.
        file_count: usize,
    },
}

/// Downloads a subtree to scratch space and archives it.
pub struct ArchiveExporter<'a> {
    store: &'a dyn ObjectStore,
    placeholder: &'a str,
    format: ArchiveFormat,
    scratch_dir: Option<&'a Path>,
    max_concurrency: usize,
}

impl<'a> ArchiveExporter<'a> {
    /// Create an exporter that skips `placeholder` objects.
    pub fn new(store: &'a dyn ObjectStore, placeholder: &'a str) -> Self {
        Self {
            store,
            placeholder,
            format: ArchiveFormat::default(),
            scratch_dir: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Set the archive format.
    pub fn with_format(mut self, format: ArchiveFormat) -> Self {
        self.format = format;
        self
    }

    /// Create scratch directories under `dir` instead of the OS temp dir.
    pub fn with_scratch_dir(mut self, dir: Option<&'a Path>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Set how many objects are downloaded at once.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Export every non-placeholder object under `prefix`.
    ///
    /// A key that is also the folder of other keys (`a/x` next to
    /// `a/x/y`) cannot be materialized next to them and is skipped.
    pub async fn export(&self, prefix: &VirtualPath) -> Result<ExportOutcome> {
        let prefix_str = prefix.as_str();
        let listed = HierarchicalLister::new(self.store, self.placeholder)
            .objects(prefix_str, false)
            .await?;
        let relatives: Vec<(String, String)> = listed
            .into_iter()
            .filter_map(|info| {
                let relative = info.key.strip_prefix(prefix_str)?.to_string();
                Some((info.key, relative))
            })
            .collect();
        let folders = folder_prefixes(relatives.iter().map(|(_, relative)| relative.as_str()));

        let mut objects = Vec::new();
        for (key, relative) in relatives {
            if folders.contains(&relative) {
                warn!(key = %key, "skipping key that is also a folder of other keys");
                continue;
            }
            match scratch_relative_path(&relative) {
                Some(path) => objects.push((key, path)),
                None => warn!(key = %key, "skipping key that cannot be written to disk"),
            }
        }

        if objects.is_empty() {
            debug!(prefix = %prefix, "nothing to export");
            return Ok(ExportOutcome::Empty);
        }
        let file_count = objects.len();

        let scratch = self.scratch()?;
        let root = scratch.path().to_path_buf();
        let store = self.store;
        let mut batch = Batch::new("export", file_count, self.max_concurrency);
        batch
            .run(objects, |(key, relative)| {
                let target = root.join(relative);
                async move {
                    debug!(key = %key, "downloading for export");
                    download(store, &key, &target).await
                }
            })
            .await?;

        let mut child = self.format.command().current_dir(&root).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "archiver stdout not captured"))?;

        info!(
            prefix = %prefix,
            files = file_count,
            content_type = self.format.content_type(),
            "export started"
        );
        Ok(ExportOutcome::Archive {
            stream: ArchiveStream::new(child, stdout, scratch),
            file_count,
        })
    }

    fn scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("blobtree-export-");
        let dir = match self.scratch_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "scratch directory created");
        Ok(dir)
    }
}

async fn download(store: &dyn ObjectStore, key: &str, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut reader = store.open_read(key).await?;
    let mut file = fs::File::create(target).await?;
    tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    Ok(())
}

/// Every proper ancestor folder of the given relative paths, without
/// trailing slashes.
fn folder_prefixes<'a>(relatives: impl Iterator<Item = &'a str>) -> HashSet<String> {
    let mut folders = HashSet::new();
    for relative in relatives {
        for (idx, _) in relative.match_indices('/') {
            folders.insert(relative[..idx].to_string());
        }
    }
    folders
}

/// Relative on-disk path for a key's remainder below the export prefix,
/// or `None` when a segment could step outside the scratch directory.
fn scratch_relative_path(relative: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

/// Archive bytes from a running archiver.
///
/// Reading to the end (or failing, or dropping the stream) removes the
/// scratch directory the archive was built from.
#[derive(Debug)]
pub struct ArchiveStream {
    child: Child,
    stdout: ChildStdout,
    scratch: Option<TempDir>,
    scratch_path: PathBuf,
}

impl ArchiveStream {
    fn new(child: Child, stdout: ChildStdout, scratch: TempDir) -> Self {
        let scratch_path = scratch.path().to_path_buf();
        Self {
            child,
            stdout,
            scratch: Some(scratch),
            scratch_path,
        }
    }

    /// Where the subtree was materialized. Gone once the stream ends.
    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    /// Adapt into a stream of byte chunks.
    pub fn into_stream(self) -> ReaderStream<Self> {
        ReaderStream::new(self)
    }

    /// Discard any unread output and wait for the archiver to exit.
    ///
    /// Returns an error when the archiver exited unsuccessfully.
    pub async fn finish(mut self) -> Result<()> {
        tokio::io::copy(&mut self, &mut tokio::io::sink()).await?;
        let status = self.child.wait().await?;
        self.release();
        if status.success() {
            Ok(())
        } else {
            Err(BlobTreeError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("archiver exited with {status}"),
            )))
        }
    }

    fn release(&mut self) {
        let Some(scratch) = self.scratch.take() else {
            return;
        };
        match scratch.close() {
            Ok(()) => debug!(path = %self.scratch_path.display(), "scratch directory removed"),
            Err(e) => warn!(
                path = %self.scratch_path.display(),
                error = %e,
                "failed to remove scratch directory"
            ),
        }
    }
}

impl AsyncRead for ArchiveStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;

        match Pin::new(&mut this.stdout).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if had_room && buf.filled().len() == before && this.scratch.is_some() {
                    this.release();
                    if let Ok(Some(status)) = this.child.try_wait() {
                        if !status.success() {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::Other,
                                format!("archiver exited with {status}"),
                            )));
                        }
                    }
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.release();
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        if self.scratch.is_some() {
            // Abandoned mid-stream.
            let _ = self.child.start_kill();
        }
        self.release();
    }
}
