//! One-level listings synthesized from flat keys.

use std::collections::BTreeSet;

use futures::TryStreamExt;
use tracing::debug;

use super::entry::{sort_entries, VirtualEntry};
use crate::path::VirtualPath;
use crate::store::{ObjectInfo, ObjectStore};
use crate::Result;

/// Enumerates keys under a prefix and projects them into [`VirtualEntry`]s.
pub struct HierarchicalLister<'a> {
    store: &'a dyn ObjectStore,
    placeholder: &'a str,
}

impl<'a> HierarchicalLister<'a> {
    /// Create a lister that treats `placeholder` as the folder marker name.
    pub fn new(store: &'a dyn ObjectStore, placeholder: &'a str) -> Self {
        Self { store, placeholder }
    }

    /// Whether a key is a folder placeholder.
    pub fn is_placeholder(&self, key: &str) -> bool {
        let name = key.rsplit('/').next().unwrap_or(key);
        name == self.placeholder
    }

    /// Every object under `prefix`, optionally without placeholders.
    pub async fn objects(&self, prefix: &str, include_placeholders: bool) -> Result<Vec<ObjectInfo>> {
        self.store
            .list(prefix)
            .try_filter(|info| {
                let keep = include_placeholders || !self.is_placeholder(&info.key);
                futures::future::ready(keep)
            })
            .try_collect()
            .await
    }

    /// List `prefix` (a folder path).
    ///
    /// Hierarchical mode returns the immediate children only: a key more
    /// than one segment below `prefix` contributes a single folder entry
    /// for its first segment, which is how placeholders make empty folders
    /// visible. Flat mode returns every non-placeholder object, named by
    /// its path relative to `prefix`.
    pub async fn list(&self, prefix: &VirtualPath, hierarchical: bool) -> Result<Vec<VirtualEntry>> {
        let prefix = prefix.as_str();
        let mut folders = BTreeSet::new();
        let mut entries = Vec::new();

        let mut objects = self.store.list(prefix);
        while let Some(info) = objects.try_next().await? {
            let Some(relative) = info.key.strip_prefix(prefix) else {
                continue;
            };
            if relative.is_empty() {
                continue;
            }

            if !hierarchical {
                if !self.is_placeholder(&info.key) {
                    entries.push(VirtualEntry::file(relative.to_string(), info));
                }
                continue;
            }

            match relative.split_once('/') {
                Some((first, _)) => {
                    // "a//b" style keys have an empty first segment; there is
                    // no folder to show for them.
                    if !first.is_empty() && folders.insert(first.to_string()) {
                        entries.push(VirtualEntry::folder(prefix, first));
                    }
                }
                None if self.is_placeholder(&info.key) => {}
                None => {
                    let name = relative.to_string();
                    entries.push(VirtualEntry::file(name, info));
                }
            }
        }

        sort_entries(&mut entries);
        debug!(prefix, hierarchical, count = entries.len(), "listed");
        Ok(entries)
    }
}
