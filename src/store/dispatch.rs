//! Completion dispatcher: in-flight requests and their callbacks
//!
//! Each context owns one dispatcher. A request is registered under a fresh
//! token just before its wire request is dispatched. Whichever of
//! `finish` or `cancel` removes the token first resolves the callback;
//! the other finds nothing and does nothing, so every callback fires
//! exactly once.

use super::engine::StoreError;
use super::events::StoreEvent;
use super::merge::MergeReport;
use super::save::SaveSummary;
use crate::adapter::CancellationToken;
use crate::graph::ObjectId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Identifies one in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(Uuid);

impl RequestToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// One object's write within a save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOperation {
    pub object: ObjectId,
    pub kind: WriteKind,
}

/// The originating request of a pending request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Fetch { entity: String },
    Save { operations: Vec<WriteOperation> },
    AttributeFault { object: ObjectId },
    RelationshipFault { object: ObjectId, relationship: String },
}

/// What a successful request produced
#[derive(Debug, Clone)]
pub enum CompletionPayload {
    /// Local result set after merging, plus what the merge did
    Fetched {
        objects: Vec<ObjectId>,
        report: MergeReport,
    },
    Saved(SaveSummary),
    AttributesMaterialized {
        object: ObjectId,
        /// False when the fault was left in place (network suppressed)
        materialized: bool,
    },
    RelationshipMaterialized {
        object: ObjectId,
        relationship: String,
        related: Vec<ObjectId>,
        materialized: bool,
    },
}

pub type Outcome = Result<CompletionPayload, Arc<StoreError>>;

/// Delivered once to a request's callback
#[derive(Debug, Clone)]
pub struct Completion {
    /// `None` when the request was answered locally without a pending request
    pub token: Option<RequestToken>,
    pub outcome: Outcome,
}

impl Completion {
    pub(crate) fn local(payload: CompletionPayload) -> Self {
        Self {
            token: None,
            outcome: Ok(payload),
        }
    }
}

pub type CompletionCallback = Box<dyn FnOnce(Completion) + Send + 'static>;

/// A request whose wire call is in flight
#[derive(Debug)]
pub struct PendingRequest {
    pub token: RequestToken,
    pub kind: RequestKind,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    abort: Option<AbortHandle>,
}

struct Entry {
    pending: PendingRequest,
    // Callbacks are only Send; the mutex makes the table shareable.
    callback: Mutex<Option<CompletionCallback>>,
    /// Set once the worker starts committing; cancel no longer applies.
    claimed: bool,
}

/// Token -> callback table plus the context's event channel
pub struct CompletionDispatcher {
    context: String,
    table: DashMap<RequestToken, Entry>,
    events: broadcast::Sender<StoreEvent>,
}

impl CompletionDispatcher {
    pub fn new(context: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            context: context.into(),
            table: DashMap::new(),
            events,
        }
    }

    /// Register a request and emit its `Will*` event.
    pub fn begin(
        &self,
        kind: RequestKind,
        callback: Option<CompletionCallback>,
    ) -> (RequestToken, CancellationToken) {
        let token = RequestToken::new();
        let cancel = CancellationToken::new();
        let event = StoreEvent::will(token, &kind);
        tracing::debug!(context = %self.context, %token, ?kind, "request dispatched");

        self.table.insert(
            token,
            Entry {
                pending: PendingRequest {
                    token,
                    kind,
                    cancel: cancel.clone(),
                    started_at: Utc::now(),
                    abort: None,
                },
                callback: Mutex::new(callback),
                claimed: false,
            },
        );
        self.emit(event);
        (token, cancel)
    }

    /// Attach the worker task so cancellation can abort it.
    ///
    /// A no-op if the request already resolved.
    pub fn attach(&self, token: RequestToken, abort: AbortHandle) {
        if let Some(mut entry) = self.table.get_mut(&token) {
            entry.pending.abort = Some(abort);
        }
    }

    /// Resolve a request. Returns false if it was already resolved.
    pub fn finish(&self, token: RequestToken, outcome: Outcome) -> bool {
        let Some((_, entry)) = self.table.remove(&token) else {
            tracing::debug!(context = %self.context, %token, "completion for resolved request dropped");
            return false;
        };
        match &outcome {
            Ok(_) => tracing::debug!(context = %self.context, %token, "request completed"),
            Err(error) => tracing::debug!(context = %self.context, %token, %error, "request failed"),
        }
        self.resolve(entry, outcome);
        true
    }

    /// Claim a request for commit. Workers call this right before they
    /// mutate a graph; once it succeeds, `cancel` returns false and the
    /// request resolves through `finish`.
    ///
    /// Returns false if the request was cancelled or already claimed.
    pub fn claim(&self, token: RequestToken) -> bool {
        match self.table.get_mut(&token) {
            Some(mut entry) if !entry.claimed => {
                entry.claimed = true;
                true
            }
            _ => false,
        }
    }

    /// Cancel a request: its callback receives `StoreError::Cancelled`.
    ///
    /// Returns false if the request already resolved or its worker has
    /// claimed it for commit.
    pub fn cancel(&self, token: RequestToken) -> bool {
        let Some((_, entry)) = self.table.remove_if(&token, |_, entry| !entry.claimed) else {
            return false;
        };
        entry.pending.cancel.cancel();
        if let Some(abort) = &entry.pending.abort {
            abort.abort();
        }
        tracing::info!(context = %self.context, %token, "request cancelled");
        self.resolve(entry, Err(Arc::new(StoreError::Cancelled)));
        true
    }

    /// Cancel every in-flight request; returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<RequestToken> = self.table.iter().map(|e| *e.key()).collect();
        tokens.into_iter().filter(|t| self.cancel(*t)).count()
    }

    pub fn is_pending(&self, token: &RequestToken) -> bool {
        self.table.contains_key(token)
    }

    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    /// Snapshot of in-flight requests
    pub fn pending(&self) -> Vec<(RequestToken, RequestKind)> {
        self.table
            .iter()
            .map(|e| (*e.key(), e.pending.kind.clone()))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn resolve(&self, entry: Entry, outcome: Outcome) {
        let Entry { pending, callback, .. } = entry;
        self.emit(StoreEvent::did(pending.token, pending.kind, outcome.clone()));
        let callback = callback.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback {
            callback(Completion {
                token: Some(pending.token),
                outcome,
            });
        }
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for CompletionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionDispatcher")
            .field("context", &self.context)
            .field("in_flight", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(count: &Arc<AtomicUsize>) -> CompletionCallback {
        let count = Arc::clone(count);
        Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn fetched() -> Outcome {
        Ok(CompletionPayload::Fetched {
            objects: Vec::new(),
            report: MergeReport::default(),
        })
    }

    fn fetch_kind() -> RequestKind {
        RequestKind::Fetch {
            entity: "Post".into(),
        }
    }

    #[test]
    fn finish_resolves_once() {
        let dispatcher = CompletionDispatcher::new("main");
        let count = Arc::new(AtomicUsize::new(0));
        let (token, _) = dispatcher.begin(fetch_kind(), Some(counting_callback(&count)));
        assert!(dispatcher.is_pending(&token));

        assert!(dispatcher.finish(token, fetched()));
        assert!(!dispatcher.finish(token, fetched()));
        assert!(!dispatcher.cancel(token));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn cancel_resolves_with_cancelled() {
        let dispatcher = CompletionDispatcher::new("main");
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let (token, cancel) = dispatcher.begin(
            fetch_kind(),
            Some(Box::new(move |c: Completion| {
                *sink.lock().unwrap() = Some(c);
            })),
        );

        assert!(dispatcher.cancel(token));
        assert!(cancel.is_cancelled());
        assert!(!dispatcher.finish(token, fetched()));

        let completion = seen.lock().unwrap().take().unwrap();
        assert_eq!(completion.token, Some(token));
        assert!(matches!(completion.outcome.as_ref().map_err(|e| e.as_ref()), Err(StoreError::Cancelled)));
    }

    #[test]
    fn concurrent_requests_resolve_independently() {
        let dispatcher = CompletionDispatcher::new("main");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (a, _) = dispatcher.begin(fetch_kind(), Some(counting_callback(&first)));
        let (b, _) = dispatcher.begin(fetch_kind(), Some(counting_callback(&second)));
        assert_ne!(a, b);

        dispatcher.finish(b, fetched());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(dispatcher.is_pending(&a));
    }

    #[test]
    fn cancel_all_counts() {
        let dispatcher = CompletionDispatcher::new("main");
        dispatcher.begin(fetch_kind(), None);
        dispatcher.begin(fetch_kind(), None);
        assert_eq!(dispatcher.cancel_all(), 2);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn finish_and_cancel_race_fires_once() {
        let dispatcher = Arc::new(CompletionDispatcher::new("main"));
        for _ in 0..200 {
            let count = Arc::new(AtomicUsize::new(0));
            let (token, _) = dispatcher.begin(fetch_kind(), Some(counting_callback(&count)));

            let d1 = Arc::clone(&dispatcher);
            let d2 = Arc::clone(&dispatcher);
            let finisher = std::thread::spawn(move || d1.finish(token, fetched()));
            let canceller = std::thread::spawn(move || d2.cancel(token));
            let finished = finisher.join().unwrap();
            let cancelled = canceller.join().unwrap();

            assert!(finished ^ cancelled);
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn claimed_request_ignores_cancel() {
        let dispatcher = CompletionDispatcher::new("main");
        let count = Arc::new(AtomicUsize::new(0));
        let (token, cancel) = dispatcher.begin(fetch_kind(), Some(counting_callback(&count)));

        assert!(dispatcher.claim(token));
        assert!(!dispatcher.claim(token));
        assert!(!dispatcher.cancel(token));
        assert!(!cancel.is_cancelled());
        assert!(dispatcher.is_pending(&token));

        assert!(dispatcher.finish(token, fetched()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_request_cannot_be_claimed() {
        let dispatcher = CompletionDispatcher::new("main");
        let (token, _) = dispatcher.begin(fetch_kind(), None);
        assert!(dispatcher.cancel(token));
        assert!(!dispatcher.claim(token));
    }

    #[test]
    fn claim_and_cancel_race_commits_or_cancels() {
        let dispatcher = Arc::new(CompletionDispatcher::new("main"));
        for _ in 0..200 {
            let count = Arc::new(AtomicUsize::new(0));
            let (token, _) = dispatcher.begin(fetch_kind(), Some(counting_callback(&count)));

            let d1 = Arc::clone(&dispatcher);
            let d2 = Arc::clone(&dispatcher);
            let claimer = std::thread::spawn(move || d1.claim(token));
            let canceller = std::thread::spawn(move || d2.cancel(token));
            let claimed = claimer.join().unwrap();
            let cancelled = canceller.join().unwrap();

            assert!(claimed ^ cancelled);
            if claimed {
                assert!(dispatcher.finish(token, fetched()));
            }
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn events_bracket_the_request() {
        let dispatcher = CompletionDispatcher::new("main");
        let mut events = dispatcher.subscribe();
        let (token, _) = dispatcher.begin(fetch_kind(), None);
        dispatcher.finish(token, fetched());

        let will = events.recv().await.unwrap();
        let did = events.recv().await.unwrap();
        assert!(matches!(will, StoreEvent::WillFetch { .. }));
        assert!(matches!(did, StoreEvent::DidFetch { .. }));
        assert_eq!(did.token(), token);
    }
}
