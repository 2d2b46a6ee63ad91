//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur inside the key-value engine.
///
/// A missing key is not an error: lookups and cursor moves return `None`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A no-overwrite put found the key already present.
    #[error("key already exists")]
    KeyExists,

    /// The transaction handle is unknown, finished, or currently shadowed by a child.
    #[error("bad transaction: {message}")]
    BadTransaction {
        /// Why the handle cannot be used.
        message: String,
    },

    /// A write was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The table handle does not name an opened table.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The cursor handle is unknown or already closed.
    #[error("bad cursor: {0}")]
    BadCursor(u64),

    /// A cursor operation was called without the arguments it needs.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The engine is closed.
    #[error("engine is closed")]
    Closed,
}

impl StorageError {
    /// Creates a bad transaction error.
    pub fn bad_transaction(message: impl Into<String>) -> Self {
        Self::BadTransaction {
            message: message.into(),
        }
    }
}
