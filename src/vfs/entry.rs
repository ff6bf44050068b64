//! Listing results.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::ObjectInfo;

/// One row of a listing: a stored file or a synthesized folder.
///
/// Folders are computed from key prefixes and exist only for the duration
/// of the listing that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VirtualEntry {
    /// A stored object.
    File {
        /// Display name (relative to the listed prefix).
        name: String,
        /// Full object key.
        key: String,
        /// Size in bytes.
        size: u64,
        /// Last modification time.
        last_modified: DateTime<Utc>,
        /// Content type, when known.
        content_type: Option<String>,
    },
    /// An immediate child folder.
    Folder {
        /// Folder name, without a trailing slash.
        name: String,
        /// Folder path, with a trailing slash.
        path: String,
    },
}

impl VirtualEntry {
    pub(crate) fn file(name: impl Into<String>, info: ObjectInfo) -> Self {
        VirtualEntry::File {
            name: name.into(),
            key: info.key,
            size: info.size,
            last_modified: info.last_modified,
            content_type: info.content_type,
        }
    }

    pub(crate) fn folder(prefix: &str, name: &str) -> Self {
        VirtualEntry::Folder {
            name: name.to_string(),
            path: format!("{prefix}{name}/"),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        match self {
            VirtualEntry::File { name, .. } | VirtualEntry::Folder { name, .. } => name,
        }
    }

    /// Whether this entry is a folder.
    pub fn is_folder(&self) -> bool {
        matches!(self, VirtualEntry::Folder { .. })
    }
}

/// Folders first, then case-insensitive name. Names equal ignoring case
/// fall back to a byte comparison so the order is total.
pub fn sort_entries(entries: &mut [VirtualEntry]) {
    entries.sort_by(compare_entries);
}

fn compare_entries(a: &VirtualEntry, b: &VirtualEntry) -> Ordering {
    b.is_folder()
        .cmp(&a.is_folder())
        .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
        .then_with(|| a.name().cmp(b.name()))
}
