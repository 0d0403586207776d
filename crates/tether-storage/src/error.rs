//! Error types for the storage crate.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Document already exists (create is single-writer).
    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    /// Malformed document path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Field write into a document whose shape does not allow it.
    #[error("Invalid field {field} in {path}")]
    InvalidField { path: String, field: String },

    /// A transaction mutator refused to commit.
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether the error left the store untouched because of a precondition.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::AlreadyExists(_) | Error::Aborted(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(feature = "redb")]
mod redb_conversions {
    use super::Error;

    impl From<redb::Error> for Error {
        fn from(e: redb::Error) -> Self {
            Error::Storage(format!("Redb error: {}", e))
        }
    }

    impl From<redb::TransactionError> for Error {
        fn from(e: redb::TransactionError) -> Self {
            Error::Storage(format!("Redb transaction error: {}", e))
        }
    }

    impl From<redb::TableError> for Error {
        fn from(e: redb::TableError) -> Self {
            Error::Storage(format!("Redb table error: {}", e))
        }
    }

    impl From<redb::StorageError> for Error {
        fn from(e: redb::StorageError) -> Self {
            Error::Storage(format!("Redb storage error: {}", e))
        }
    }

    impl From<redb::CommitError> for Error {
        fn from(e: redb::CommitError) -> Self {
            Error::Storage(format!("Redb commit error: {}", e))
        }
    }

    impl From<redb::DatabaseError> for Error {
        fn from(e: redb::DatabaseError) -> Self {
            Error::Storage(format!("Redb database error: {}", e))
        }
    }
}
