//! Prelude module - commonly used types for convenient import.

// Errors
pub use crate::{StorageError, StorageResult};

// Stores
pub use crate::{FileKvStore, KvStore, KvWrite, MemoryKvStore, ScopedKvStore};
