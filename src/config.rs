//! Configuration module for blobtree.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::path::{PathSanitizer, TraversalPolicy, DEFAULT_SANDBOX_ROOT};
use crate::store::{StorageBackend, DEFAULT_PAGE_SIZE};
use crate::vfs::{ArchiveFormat, DEFAULT_MAX_CONCURRENCY, DEFAULT_PLACEHOLDER_NAME};
use crate::{BlobTreeError, Result};

/// Object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Which store implementation to use.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Base directory of the local backend.
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Keys per listing page (memory backend).
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

fn default_storage_root() -> String {
    "data/blobs".to_string()
}

fn default_list_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
            list_page_size: default_list_page_size(),
        }
    }
}

/// Sandbox configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Key prefix every path is confined to.
    #[serde(default = "default_sandbox_root")]
    pub root: String,
    /// Name of the zero-length object that keeps empty folders visible.
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
    /// Handling of `.` and `..` path segments (discard, reject).
    #[serde(default)]
    pub traversal: TraversalPolicy,
}

fn default_sandbox_root() -> String {
    DEFAULT_SANDBOX_ROOT.to_string()
}

fn default_placeholder_name() -> String {
    DEFAULT_PLACEHOLDER_NAME.to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
            placeholder_name: default_placeholder_name(),
            traversal: TraversalPolicy::default(),
        }
    }
}

/// Transfer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Objects processed at once by move, delete and export.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_upload_size() -> u64 {
    200
}

impl TransferConfig {
    /// Maximum upload size in bytes.
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_upload_size_mb: default_max_upload_size(),
        }
    }
}

/// Export configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportConfig {
    /// Archive format (zip, tar_gz).
    #[serde(default)]
    pub format: ArchiveFormat,
    /// Directory for temporary export trees. Defaults to the OS temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty disables file logging.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/blobtree.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Object store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Sandbox configuration.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Export configuration.
    #[serde(default)]
    pub export: ExportConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(BlobTreeError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| BlobTreeError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `BLOBTREE_SANDBOX_ROOT`: Override the sandbox root
    /// - `BLOBTREE_STORAGE_ROOT`: Override the local store directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("BLOBTREE_SANDBOX_ROOT") {
            if !root.is_empty() {
                self.sandbox.root = root;
            }
        }
        if let Ok(root) = std::env::var("BLOBTREE_STORAGE_ROOT") {
            if !root.is_empty() {
                self.storage.root = root;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - the sandbox root is empty once normalized
    /// - the placeholder name is not a plain file name
    /// - concurrency or listing page size is zero
    pub fn validate(&self) -> Result<()> {
        if PathSanitizer::new(&self.sandbox.root).root().is_empty() {
            return Err(BlobTreeError::Validation(
                "sandbox.root must name at least one folder".to_string(),
            ));
        }
        let placeholder = &self.sandbox.placeholder_name;
        if placeholder.is_empty()
            || placeholder.contains(['/', '\\'])
            || placeholder.chars().all(|c| c == '.')
        {
            return Err(BlobTreeError::Validation(format!(
                "sandbox.placeholder_name '{placeholder}' is not a valid file name"
            )));
        }
        if self.transfer.max_concurrency == 0 {
            return Err(BlobTreeError::Validation(
                "transfer.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.storage.list_page_size == 0 {
            return Err(BlobTreeError::Validation(
                "storage.list_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
