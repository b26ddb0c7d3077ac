//! Error types for skipfile
//!
//! Provides a unified error type for all engine operations.
//!
//! Iteration exhaustion is not an error: cursors and `fetch_next` signal
//! "no more records" through `Ok(None)`.

use thiserror::Error;

/// Result type alias using SkipError
pub type Result<T> = std::result::Result<T, SkipError>;

/// Unified error type for skipfile operations
#[derive(Debug, Error)]
pub enum SkipError {
    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    /// Missing key, or missing file opened without `create`
    #[error("not found")]
    NotFound,

    /// A `MustNotExist` precondition was violated
    #[error("record already exists")]
    Exists,

    // -------------------------------------------------------------------------
    // Locking Errors
    // -------------------------------------------------------------------------
    /// Lock contention under non-blocking mode, a yield attempted while
    /// holding the exclusive lock, or an incompatible nested acquisition
    #[error("locked")]
    Locked,

    /// Write rejected because the handle was opened read-only
    #[error("read only")]
    ReadOnly,

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Invariant Violations
    // -------------------------------------------------------------------------
    /// Structural invariant violation or checksum mismatch
    #[error("internal error: {0}")]
    Internal(String),
}

impl SkipError {
    /// Build an `Internal` error from anything displayable
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        SkipError::Internal(msg.into())
    }
}
