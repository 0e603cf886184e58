//! Local queries over a context's object graph
//!
//! Fetch requests are evaluated against the local graph only; the store
//! decides separately whether to refresh it from the network first.

mod request;
mod types;

pub use request::FetchRequest;
pub use types::{FetchResult, Predicate, SortDescriptor};
