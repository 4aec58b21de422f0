//! Error types for the storage engine.
//!
//! Mirrors the five error kinds the engine distinguishes: `Io`,
//! `Corruption`, `VersionMismatch`, `OutOfSpace`, and `InvalidArgument`.
//! `insert`/`remove` returning `false` for an already-present/absent key is
//! a benign no-op, never one of these variants.

use thiserror::Error;

use crate::types::PageId;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Any read/write/fsync failure from the underlying file. Never
    /// retried at the engine layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A structural assertion failed while loading the file: a pointer led
    /// outside the file, the free-list chain was malformed, a checksum
    /// didn't match, and so on.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// The file header's version tag was not recognized.
    #[error("unsupported file version: {found:?}")]
    VersionMismatch { found: String },

    /// Extending the file to satisfy a page allocation failed.
    #[error("out of space: could not extend the file")]
    OutOfSpace,

    /// A caller-supplied argument was invalid for this operation (key too
    /// long, value too large to represent, page index out of range, …).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested page does not exist in the file.
    #[error("page {0} not found")]
    PageNotFound(PageId),
}

impl StorageError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
