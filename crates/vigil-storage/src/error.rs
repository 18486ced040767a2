//! Storage error types.

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A storage operation failed.
    #[error("storage error: {0}")]
    Internal(String),

    /// Filesystem I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Another process holds the writer lock.
    #[error("store is locked by another writer: {0}")]
    Locked(String),

    /// A write was attempted on a store opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The namespace or key is invalid.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
