//! Backing stores for root contexts
//!
//! Persistence goes through the `GraphStore` trait. The shipped
//! implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{GraphStore, OpenStore, StorageError, StorageResult};
