//! Error types for the directory backend.

use dirstore_storage::StorageError;
use thiserror::Error;

/// Result type for backend operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in backend operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key-value engine failure. Fatal to the current transaction.
    #[error("engine error: {0}")]
    Storage(#[from] StorageError),

    /// Entry blob or journal record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// A point lookup or DN/GUID resolution missed.
    #[error("entry not found: {what}")]
    EntryNotFound {
        /// What was looked up.
        what: String,
    },

    /// A transaction rule was violated (mode upgrade, client transaction
    /// id mismatch, expired user transaction).
    #[error("unwilling to perform: {message}")]
    Unwilling {
        /// Why the request was refused.
        message: String,
    },

    /// A unique index already holds the value for another entry.
    #[error("constraint violation: {message}")]
    Constraint {
        /// Description of the violated constraint.
        message: String,
    },

    /// An entry with this DN already exists.
    #[error("entry already exists: {dn}")]
    EntryExists {
        /// The conflicting normalized DN.
        dn: String,
    },

    /// The parent of a new entry does not exist.
    #[error("parent entry not found for {dn}")]
    ParentNotFound {
        /// The DN whose parent is missing.
        dn: String,
    },

    /// The entry still has children.
    #[error("operation not allowed on non-leaf entry {dn}")]
    NotAllowedOnNonLeaf {
        /// The DN of the entry.
        dn: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Stored bytes do not have the expected shape.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The backend has been shut down.
    #[error("backend is shut down")]
    BackendClosed,
}

/// LDAP result codes surfaced to clients for backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResultCode {
    /// Generic server-side failure.
    OperationsError = 1,
    /// A constraint on an attribute value was violated.
    ConstraintViolation = 19,
    /// The target entry does not exist.
    NoSuchObject = 32,
    /// The server refuses the request.
    UnwillingToPerform = 53,
    /// The operation requires a leaf entry.
    NotAllowedOnNonLeaf = 66,
    /// The entry already exists.
    EntryAlreadyExists = 68,
}

impl ResultCode {
    /// Returns the numeric protocol value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an entry not found error.
    pub fn entry_not_found(what: impl Into<String>) -> Self {
        Self::EntryNotFound { what: what.into() }
    }

    /// Creates an unwilling to perform error.
    pub fn unwilling(message: impl Into<String>) -> Self {
        Self::Unwilling {
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns true for a lookup miss.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntryNotFound { .. })
    }

    /// Returns true for a transaction rule violation.
    #[must_use]
    pub fn is_unwilling(&self) -> bool {
        matches!(self, Self::Unwilling { .. })
    }

    /// Maps the error onto the LDAP result code reported to the client.
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::EntryNotFound { .. } | Self::ParentNotFound { .. } => ResultCode::NoSuchObject,
            Self::Unwilling { .. } => ResultCode::UnwillingToPerform,
            Self::Constraint { .. } => ResultCode::ConstraintViolation,
            Self::EntryExists { .. } => ResultCode::EntryAlreadyExists,
            Self::NotAllowedOnNonLeaf { .. } => ResultCode::NotAllowedOnNonLeaf,
            _ => ResultCode::OperationsError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_follow_error_class() {
        assert_eq!(
            CoreError::unwilling("mode upgrade").result_code().as_u32(),
            53
        );
        assert_eq!(CoreError::entry_not_found("x").result_code().as_u32(), 32);
        assert_eq!(CoreError::constraint("dup").result_code().as_u32(), 19);
        assert_eq!(
            CoreError::from(StorageError::Closed).result_code(),
            ResultCode::OperationsError
        );
    }

    #[test]
    fn classification_helpers() {
        assert!(CoreError::entry_not_found("dn").is_not_found());
        assert!(!CoreError::unwilling("x").is_not_found());
        assert!(CoreError::unwilling("x").is_unwilling());
    }
}
