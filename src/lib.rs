//! Mirrorgraph: an incrementally synchronized local object graph
//!
//! A local, queryable object graph that mirrors remote HTTP resource
//! collections. Reads are answered locally and refreshed from the server on
//! demand; writes are batched into per-object requests; everything the
//! server returns is merged back while preserving object identity.
//!
//! # Core Concepts
//!
//! - **Contexts**: layers of the local graph, each with its own identity map
//! - **Resource adapters**: translate requests to wire calls and decode responses
//! - **Faults**: objects or relationships known to exist but not yet loaded
//! - **Completions**: every network request resolves its callback exactly once
//!
//! # Example
//!
//! ```no_run
//! use mirrorgraph::{FetchRequest, HttpTransport, IncrementalStore, Model, RestAdapter, StoreConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let model = Model::from_yaml("entities: { Post: { attributes: { title: string } } }")?;
//! let store = IncrementalStore::new(
//!     model,
//!     Arc::new(RestAdapter::new()),
//!     Arc::new(HttpTransport::new("https://api.example.com")?),
//!     StoreConfig::default(),
//! )?;
//! let context = store.root_context()?;
//! let posts = store.fetch(&context, FetchRequest::new("Post")).await?;
//! println!("{} posts", posts.result.total_count);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod graph;
pub mod query;
pub mod storage;
pub mod store;

pub use adapter::{
    AdapterCapabilities, AdapterError, HttpTransport, Method, Representation, Representations, ResourceAdapter,
    RestAdapter, Transport, TransportError, WireRequest, WireResponse,
};
pub use config::{Config, ConfigError, StoreConfig};
pub use graph::{
    EntityDescriptor, GraphError, LocalGraph, ManagedObject, Model, ObjectId, PropertyValue, ResourceId,
};
pub use query::{FetchRequest, FetchResult, Predicate, SortDescriptor};
pub use storage::{GraphStore, OpenStore, SqliteStore, StorageError, StorageResult};
pub use store::{
    Completion, CompletionPayload, IncrementalStore, RequestToken, SaveChangesRequest, SaveSummary, StoreContext,
    StoreError, StoreEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
