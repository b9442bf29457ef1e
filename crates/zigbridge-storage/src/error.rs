//! Error types for the storage crate.

use thiserror::Error;

// Re-export the core error type
pub use zigbridge_core::error::Error as BridgeError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Backend(String),

    /// Invalid key or namespace.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for BridgeError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(e) => BridgeError::Storage(e.to_string()),
            StorageError::Serialization(s) => BridgeError::Serialization(s),
            StorageError::Backend(s) => BridgeError::Storage(s),
            StorageError::InvalidInput(s) => BridgeError::InvalidArgument(s),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        StorageError::Backend(format!("Redb transaction error: {}", e))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        StorageError::Backend(format!("Redb table error: {}", e))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        StorageError::Backend(format!("Redb storage error: {}", e))
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        StorageError::Backend(format!("Redb commit error: {}", e))
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        StorageError::Backend(format!("Redb database error: {}", e))
    }
}
