//! blobtree - folders and files over a flat object store
//!
//! Object stores address blobs by flat keys and know nothing about
//! directories. This crate layers a sandboxed folder hierarchy on top:
//! path sanitization, placeholder-backed empty folders, one-level listings,
//! subtree move and delete, and streaming archive export.

pub mod config;
pub mod error;
pub mod logging;
pub mod path;
pub mod store;
pub mod vfs;

pub use config::Config;
pub use error::{BlobTreeError, Result};
pub use path::{sanitize_name, PathSanitizer, TraversalPolicy, VirtualPath};
pub use store::{LocalStore, MemoryStore, ObjectInfo, ObjectReader, ObjectStore, StorageBackend};
pub use vfs::{
    ArchiveExporter, ArchiveFormat, ArchiveStream, ExportOutcome, FolderManager,
    HierarchicalLister, VirtualEntry, VirtualFs,
};
