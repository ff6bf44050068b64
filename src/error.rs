//! Error types for blobtree.

use thiserror::Error;

/// Common error type for blobtree.
#[derive(Error, Debug)]
pub enum BlobTreeError {
    /// A path or name that cannot be used.
    ///
    /// Traversal segments in paths are normally discarded during
    /// normalization; this variant is returned for rejected names and,
    /// under [`TraversalPolicy::Reject`](crate::path::TraversalPolicy),
    /// for traversal attempts.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Object or folder not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A structurally invalid request (moving a folder into itself,
    /// folder/file type mismatch, touching the sandbox root).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Failure reported by the object store adapter.
    #[error("store error: {0}")]
    Store(String),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A multi-object operation stopped part way through.
    ///
    /// Objects already processed stay processed; re-running the same
    /// operation converges on the intended end state.
    #[error("{operation} stopped after {completed} of {total} objects: {source}")]
    Incomplete {
        /// Operation name (`move`, `delete`).
        operation: &'static str,
        /// Objects fully processed before the failure.
        completed: usize,
        /// Objects the operation set out to process.
        total: usize,
        /// The failure that stopped the operation.
        #[source]
        source: Box<BlobTreeError>,
    },

    /// Upload larger than the configured limit.
    #[error("payload too large: {0}")]
    TooLarge(String),

    /// Validation error for configuration input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BlobTreeError {
    /// Build a [`BlobTreeError::Store`] from any displayable adapter error.
    pub fn store(err: impl std::fmt::Display) -> Self {
        BlobTreeError::Store(err.to_string())
    }

    /// Whether this error (or the failure inside an `Incomplete`) came from
    /// the object store rather than from request validation.
    pub fn is_store_failure(&self) -> bool {
        match self {
            BlobTreeError::Store(_) | BlobTreeError::Io(_) => true,
            BlobTreeError::Incomplete { source, .. } => source.is_store_failure(),
            _ => false,
        }
    }
}

/// Result type alias for blobtree operations.
pub type Result<T> = std::result::Result<T, BlobTreeError>;
