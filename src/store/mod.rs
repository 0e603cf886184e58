//! The incremental store: contexts, request translators and completions
//!
//! `IncrementalStore` is the entry point. Fetches, saves and faults are
//! started against a `StoreContext`; network-backed requests are tracked by
//! the context's `CompletionDispatcher`, merged through the `CacheMerger`
//! and resolved exactly once.

mod context;
mod dispatch;
mod engine;
mod events;
mod fault;
mod fetch;
mod merge;
mod save;

pub use context::{ContextId, StoreContext};
pub use dispatch::{
    Completion, CompletionCallback, CompletionDispatcher, CompletionPayload, Outcome, PendingRequest,
    RequestKind, RequestToken, WriteKind, WriteOperation,
};
pub use engine::{IncrementalStore, StoreError, StoreResult};
pub use events::StoreEvent;
pub use fetch::{FetchOutcome, StartedFetch};
pub use merge::{MergeConflict, MergeError, MergeRejection, MergeReport};
pub use save::{SaveChangesRequest, SaveError, SaveSummary, WriteFailure};
