//! Storage trait definitions

use crate::graph::{ManagedObject, ObjectId};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Backing store for the synchronized objects of root contexts
///
/// Contexts are keyed by name so a store reopened after a restart finds the
/// same objects. Implementations must be thread-safe (Send + Sync): merges
/// persist from worker tasks.
pub trait GraphStore: Send + Sync {
    /// Save an object (insert or update)
    fn save_object(&self, context: &str, object: &ManagedObject) -> StorageResult<()>;

    /// Delete an object; returns whether it existed
    fn delete_object(&self, context: &str, id: &ObjectId) -> StorageResult<bool>;

    /// Load every object of a context
    fn load_objects(&self, context: &str) -> StorageResult<Vec<ManagedObject>>;

    /// Delete every object of a context; returns how many were removed
    fn clear_context(&self, context: &str) -> StorageResult<usize>;

    /// Names of contexts with at least one stored object
    fn list_contexts(&self) -> StorageResult<Vec<String>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
