//! StoreContext: one layer of the local graph
//!
//! A context owns its graph behind a mutex, its network suppression flags
//! and the completion dispatcher for requests it issued. Child contexts are
//! seeded from their parent's synchronized objects; merges and committed
//! writes are replayed upward through the parent chain.

use super::dispatch::{CompletionDispatcher, RequestToken};
use super::engine::{StoreError, StoreResult};
use super::events::StoreEvent;
use crate::graph::{GraphError, LocalGraph, ManagedObject, Model, ObjectId, ResourceId};
use crate::query::{FetchRequest, FetchResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Unique identifier for a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random ContextId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A layer of the local object graph
pub struct StoreContext {
    id: ContextId,
    name: String,
    parent: Option<Arc<StoreContext>>,
    graph: Mutex<LocalGraph>,
    network_suppressed: AtomicBool,
    suppress_next: AtomicBool,
    dispatcher: CompletionDispatcher,
}

impl StoreContext {
    pub(crate) fn new_root(name: impl Into<String>, model: Arc<Model>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            id: ContextId::new(),
            dispatcher: CompletionDispatcher::new(name.clone()),
            name,
            parent: None,
            graph: Mutex::new(LocalGraph::new(model)),
            network_suppressed: AtomicBool::new(false),
            suppress_next: AtomicBool::new(false),
        })
    }

    pub(crate) fn new_child(parent: &Arc<Self>, name: impl Into<String>) -> Result<Arc<Self>, GraphError> {
        let name = name.into();
        let (model, seed) = parent.read(|graph| (graph.shared_model(), graph.synchronized_objects()));
        let mut graph = LocalGraph::new(model);
        graph.restore(seed)?;

        Ok(Arc::new(Self {
            id: ContextId::new(),
            dispatcher: CompletionDispatcher::new(name.clone()),
            name,
            parent: Some(Arc::clone(parent)),
            graph: Mutex::new(graph),
            network_suppressed: AtomicBool::new(false),
            suppress_next: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<StoreContext>> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// This context followed by its ancestors, nearest first
    pub fn lineage(self: &Arc<Self>) -> Vec<Arc<StoreContext>> {
        let mut chain = vec![Arc::clone(self)];
        let mut cursor = self.parent.clone();
        while let Some(context) = cursor {
            cursor = context.parent.clone();
            chain.push(context);
        }
        chain
    }

    pub fn is_descendant_of(&self, other: &StoreContext) -> bool {
        let mut cursor = self.parent.as_ref();
        while let Some(context) = cursor {
            if context.id == other.id {
                return true;
            }
            cursor = context.parent.as_ref();
        }
        false
    }

    // === Graph access ===

    /// Run a mutation on this context's graph. Calls are serialized.
    pub fn perform<R>(&self, f: impl FnOnce(&mut LocalGraph) -> R) -> R {
        let mut graph = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut graph)
    }

    pub fn read<R>(&self, f: impl FnOnce(&LocalGraph) -> R) -> R {
        let graph = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
        f(&graph)
    }

    /// Run a fetch request against the local graph only
    pub fn execute(&self, request: &FetchRequest) -> FetchResult {
        self.read(|graph| request.execute(graph))
    }

    pub fn object(&self, id: &ObjectId) -> Option<ManagedObject> {
        self.read(|graph| graph.object(id).cloned())
    }

    pub fn lookup(&self, entity: &str, resource_id: &ResourceId) -> Option<ObjectId> {
        self.read(|graph| graph.lookup(entity, resource_id))
    }

    pub fn has_changes(&self) -> bool {
        self.read(LocalGraph::has_changes)
    }

    // === Network suppression ===

    /// While set, fetches and saves are served locally and faults stay faults.
    pub fn set_network_suppressed(&self, suppressed: bool) {
        self.network_suppressed.store(suppressed, Ordering::Release);
    }

    pub fn is_network_suppressed(&self) -> bool {
        self.network_suppressed.load(Ordering::Acquire)
    }

    /// Suppress the network for the next fetch or save only
    pub fn suppress_network_once(&self) {
        self.suppress_next.store(true, Ordering::Release);
    }

    /// Whether the next fetch or save must stay local; consumes the one-shot flag.
    pub(crate) fn take_network_suppression(&self) -> bool {
        let once = self.suppress_next.swap(false, Ordering::AcqRel);
        once || self.is_network_suppressed()
    }

    // === Requests and events ===

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.dispatcher.subscribe()
    }

    /// Cancel an in-flight request issued from this context
    pub fn cancel(&self, token: RequestToken) -> bool {
        self.dispatcher.cancel(token)
    }

    pub fn cancel_all(&self) -> usize {
        self.dispatcher.cancel_all()
    }

    pub fn is_pending(&self, token: &RequestToken) -> bool {
        self.dispatcher.is_pending(token)
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub(crate) fn dispatcher(&self) -> &CompletionDispatcher {
        &self.dispatcher
    }

    /// Claim a request's response for commit. Fails with `Cancelled` when
    /// the request was cancelled first; the worker must then leave every
    /// graph untouched.
    pub(crate) fn claim_commit(&self, token: RequestToken) -> StoreResult<()> {
        if self.dispatcher.claim(token) {
            Ok(())
        } else {
            tracing::debug!(context = %self.name, %token, "response dropped after cancel");
            Err(StoreError::Cancelled)
        }
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttributeType, EntityDescriptor};

    fn model() -> Arc<Model> {
        Arc::new(
            Model::new(vec![EntityDescriptor::new("Post").with_attribute("title", AttributeType::String)])
                .unwrap(),
        )
    }

    #[test]
    fn one_shot_suppression_is_consumed() {
        let context = StoreContext::new_root("main", model());
        assert!(!context.take_network_suppression());

        context.suppress_network_once();
        assert!(context.take_network_suppression());
        assert!(!context.take_network_suppression());

        context.set_network_suppressed(true);
        assert!(context.take_network_suppression());
        assert!(context.take_network_suppression());
    }

    #[test]
    fn child_is_seeded_with_synchronized_objects() {
        let root = StoreContext::new_root("main", model());
        let synced = root.perform(|graph| {
            let id = graph.create_fault("Post");
            graph.bind(id, &"1".into()).unwrap();
            id
        });
        root.perform(|graph| graph.insert("Post").unwrap());

        let child = StoreContext::new_child(&root, "child").unwrap();
        assert_eq!(child.lookup("Post", &"1".into()), Some(synced));
        assert_eq!(child.read(|g| g.object_count()), 1);
        assert!(!child.has_changes());
    }

    #[test]
    fn lineage_and_descent() {
        let root = StoreContext::new_root("main", model());
        let child = StoreContext::new_child(&root, "child").unwrap();
        let grandchild = StoreContext::new_child(&child, "grandchild").unwrap();

        let names: Vec<String> = grandchild.lineage().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["grandchild", "child", "main"]);
        assert!(grandchild.is_descendant_of(&root));
        assert!(!root.is_descendant_of(&grandchild));
        assert!(!root.is_descendant_of(&root));
    }
}
