//! IncrementalStore: the main entry point
//!
//! The store owns the model, the resource adapter, the transport and an
//! optional backing store, and manages the contexts created from it. The
//! request translators (fetch, save, faults) are implemented on the store
//! in their own modules; this module holds what they share: merging into a
//! context lineage, persisting root contexts and spawning network work.

use super::context::{ContextId, StoreContext};
use super::merge::{CacheMerger, MergeError, MergeReport, ObjectImage};
use crate::adapter::{AdapterError, RequestContext, ResourceAdapter, Transport, TransportError, WireResponse};
use crate::config::StoreConfig;
use crate::graph::{GraphError, Model, ObjectId, ResourceId};
use crate::storage::{GraphStore, StorageError};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

/// Errors surfaced by store operations and request completions
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("adapter does not implement {0}")]
    AdapterUnimplemented(&'static str),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unknown relationship {entity}.{relationship}")]
    UnknownRelationship { entity: String, relationship: String },

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("request cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(Arc<StorageError>),

    #[error("no async runtime available to dispatch the request")]
    NoRuntime,

    #[error("completion channel closed before the request resolved")]
    ChannelClosed,

    #[error("write task failed: {0}")]
    TaskFailed(String),
}

impl From<StorageError> for StoreError {
    fn from(error: StorageError) -> Self {
        Self::Storage(Arc::new(error))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// The incremental store
///
/// Cloning is cheap; clones share contexts, adapter and transport.
#[derive(Clone)]
pub struct IncrementalStore {
    model: Arc<Model>,
    adapter: Arc<dyn ResourceAdapter>,
    transport: Arc<dyn Transport>,
    config: Arc<StoreConfig>,
    backing: Option<Arc<dyn GraphStore>>,
    contexts: Arc<DashMap<ContextId, Arc<StoreContext>>>,
    roots: Arc<DashMap<String, Arc<StoreContext>>>,
}

impl IncrementalStore {
    /// Create a store, checking the adapter's declared capabilities against
    /// the configuration.
    pub fn new(
        model: impl Into<Arc<Model>>,
        adapter: Arc<dyn ResourceAdapter>,
        transport: Arc<dyn Transport>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let capabilities = adapter.capabilities();
        if config.remote_saves && !capabilities.writes {
            return Err(StoreError::AdapterUnimplemented("write requests"));
        }
        if config.remote_faults && !capabilities.attribute_faults {
            return Err(StoreError::AdapterUnimplemented("attribute fault requests"));
        }
        if config.remote_faults && !capabilities.relationship_faults {
            return Err(StoreError::AdapterUnimplemented("relationship fault requests"));
        }

        Ok(Self {
            model: model.into(),
            adapter,
            transport,
            config: Arc::new(config),
            backing: None,
            contexts: Arc::new(DashMap::new()),
            roots: Arc::new(DashMap::new()),
        })
    }

    /// Persist root contexts to a backing store and rehydrate them from it.
    pub fn with_backing_store(mut self, backing: Arc<dyn GraphStore>) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn adapter(&self) -> &dyn ResourceAdapter {
        self.adapter.as_ref()
    }

    // === Contexts ===

    /// Get or create the root context with this name.
    ///
    /// A new root is rehydrated from the backing store, if any.
    pub fn open_context(&self, name: &str) -> StoreResult<Arc<StoreContext>> {
        if let Some(existing) = self.roots.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let context = StoreContext::new_root(name, Arc::clone(&self.model));
        if let Some(backing) = &self.backing {
            let objects = backing.load_objects(name)?;
            let count = objects.len();
            context.perform(|graph| graph.restore(objects))?;
            tracing::info!(context = name, objects = count, "context rehydrated");
        }

        let context = Arc::clone(self.roots.entry(name.to_string()).or_insert(context).value());
        self.contexts.insert(context.id(), Arc::clone(&context));
        Ok(context)
    }

    /// The root context named by the configuration
    pub fn root_context(&self) -> StoreResult<Arc<StoreContext>> {
        self.open_context(&self.config.context_name)
    }

    /// Create a child of `parent`, seeded with its synchronized objects.
    pub fn child_context(&self, parent: &Arc<StoreContext>, name: &str) -> StoreResult<Arc<StoreContext>> {
        let child = StoreContext::new_child(parent, name)?;
        self.contexts.insert(child.id(), Arc::clone(&child));
        tracing::debug!(context = name, parent = parent.name(), "child context created");
        Ok(child)
    }

    pub fn context(&self, id: &ContextId) -> Option<Arc<StoreContext>> {
        self.contexts.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn contexts(&self) -> Vec<Arc<StoreContext>> {
        self.contexts.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Cancel a context's in-flight requests and forget it.
    pub fn close_context(&self, id: &ContextId) -> Option<Arc<StoreContext>> {
        let (_, context) = self.contexts.remove(id)?;
        let cancelled = context.cancel_all();
        if context.is_root() {
            self.roots.remove(context.name());
        }
        tracing::debug!(context = context.name(), cancelled, "context closed");
        Some(context)
    }

    /// The local object for a remote resource, registering a fault if the
    /// context has not seen the resource yet.
    pub fn reference(&self, context: &StoreContext, entity: &str, resource_id: &ResourceId) -> StoreResult<ObjectId> {
        if self.model.entity(entity).is_none() {
            return Err(StoreError::UnknownEntity(entity.to_string()));
        }
        context.perform(|graph| {
            if let Some(id) = graph.lookup(entity, resource_id) {
                return Ok(id);
            }
            let id = graph.create_fault(entity);
            if let Err(error) = graph.bind(id, resource_id) {
                graph.remove_object(id);
                return Err(error.into());
            }
            Ok(id)
        })
    }

    /// Drop every persisted object of a root context.
    pub fn clear_persisted(&self, name: &str) -> StoreResult<usize> {
        match &self.backing {
            Some(backing) => Ok(backing.clear_context(name)?),
            None => Ok(0),
        }
    }

    // === Shared by the translators ===

    pub(crate) fn request_context<'a>(&'a self, context: &'a StoreContext) -> RequestContext<'a> {
        RequestContext {
            context_name: context.name(),
            model: &self.model,
        }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn shared_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// The ambient tokio runtime network work is spawned on.
    ///
    /// Checked before a request is registered, so a missing runtime never
    /// leaves a pending request behind.
    pub(crate) fn runtime(&self) -> StoreResult<Handle> {
        Handle::try_current().map_err(|_| StoreError::NoRuntime)
    }

    /// Run a merge pass in `context`, then repeat it in each ancestor.
    ///
    /// Each pass holds only its own context's lock. Returns the value and
    /// report of the pass in `context` itself.
    pub(crate) fn merge_lineage<T>(
        &self,
        context: &Arc<StoreContext>,
        response: &WireResponse,
        mut merge: impl FnMut(&mut CacheMerger<'_>) -> T,
    ) -> (T, MergeReport) {
        let result = self.merge_pass(context, response, &mut merge);
        for ancestor in context.lineage().into_iter().skip(1) {
            let (_, report) = self.merge_pass(&ancestor, response, &mut merge);
            tracing::trace!(context = ancestor.name(), touched = report.touched().len(), "merge propagated");
        }
        result
    }

    fn merge_pass<T>(
        &self,
        context: &Arc<StoreContext>,
        response: &WireResponse,
        merge: &mut impl FnMut(&mut CacheMerger<'_>) -> T,
    ) -> (T, MergeReport) {
        let (value, report) = context.perform(|graph| {
            let mut merger = CacheMerger::new(self.adapter.as_ref(), response, graph);
            let value = merge(&mut merger);
            (value, merger.finish())
        });
        self.persist(context, &report.touched(), &[]);
        (value, report)
    }

    /// Replay committed writes into every ancestor of `context`.
    pub(crate) fn propagate_commit(
        &self,
        context: &Arc<StoreContext>,
        images: &[ObjectImage],
        deleted: &[(String, ResourceId)],
    ) {
        for ancestor in context.lineage().into_iter().skip(1) {
            let (touched, removed) = ancestor.perform(|graph| {
                let mut touched = Vec::new();
                for image in images {
                    match image.apply(graph) {
                        Ok(id) => touched.push(id),
                        Err(error) => {
                            tracing::warn!(context = ancestor.name(), %error, "committed write not propagated")
                        }
                    }
                }
                let mut removed = Vec::new();
                for (entity, rid) in deleted {
                    if let Some(id) = graph.lookup(entity, rid) {
                        graph.remove_object(id);
                        removed.push(id);
                    }
                }
                (touched, removed)
            });
            self.persist(&ancestor, &touched, &removed);
        }
    }

    /// Write synchronized objects of a root context to the backing store.
    ///
    /// Objects related to `touched` are written too, since inverse links
    /// change with them. Failures are logged; the in-memory graph stays
    /// authoritative.
    pub(crate) fn persist(&self, context: &StoreContext, touched: &[ObjectId], removed: &[ObjectId]) {
        let Some(backing) = &self.backing else {
            return;
        };
        if !context.is_root() || (touched.is_empty() && removed.is_empty()) {
            return;
        }

        let objects = context.read(|graph| {
            let mut ids: BTreeSet<ObjectId> = touched.iter().copied().collect();
            for id in touched {
                if let Some(object) = graph.object(id) {
                    ids.extend(object.relationships.values().flat_map(|v| v.targets()));
                }
            }
            ids.into_iter()
                .filter(|id| !graph.is_deleted(id))
                .filter_map(|id| graph.object(&id))
                .filter(|object| object.is_synchronized() && !object.has_pending_edits())
                .cloned()
                .collect::<Vec<_>>()
        });

        for object in &objects {
            if let Err(error) = backing.save_object(context.name(), object) {
                tracing::warn!(context = context.name(), object = %object.id, %error, "failed to persist object");
            }
        }
        for id in removed {
            if let Err(error) = backing.delete_object(context.name(), id) {
                tracing::warn!(context = context.name(), object = %id, %error, "failed to delete persisted object");
            }
        }
        tracing::trace!(context = context.name(), saved = objects.len(), removed = removed.len(), "persisted");
    }
}

impl std::fmt::Debug for IncrementalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalStore")
            .field("config", &self.config)
            .field("contexts", &self.contexts.len())
            .field("backing", &self.backing.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterCapabilities, RestAdapter};
    use crate::graph::{AttributeType, EntityDescriptor};
    use crate::storage::{OpenStore, SqliteStore};
    use crate::store::testing::ScriptedTransport;

    fn model() -> Model {
        Model::new(vec![EntityDescriptor::new("Post").with_attribute("title", AttributeType::String)]).unwrap()
    }

    struct ReadOnly(RestAdapter);

    impl ResourceAdapter for ReadOnly {
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities::read_only()
        }
        fn representations(
            &self,
            entity: &crate::graph::EntityDescriptor,
            response: &WireResponse,
        ) -> Result<crate::adapter::Representations, AdapterError> {
            self.0.representations(entity, response)
        }
        fn relationship_representations(
            &self,
            representation: &crate::adapter::Representation,
            entity: &crate::graph::EntityDescriptor,
            response: &WireResponse,
        ) -> std::collections::BTreeMap<String, crate::adapter::Representations> {
            self.0.relationship_representations(representation, entity, response)
        }
        fn resource_identifier(
            &self,
            representation: &crate::adapter::Representation,
            entity: &crate::graph::EntityDescriptor,
            response: &WireResponse,
        ) -> Option<ResourceId> {
            self.0.resource_identifier(representation, entity, response)
        }
        fn attributes(
            &self,
            representation: &crate::adapter::Representation,
            entity: &crate::graph::EntityDescriptor,
            response: &WireResponse,
        ) -> crate::graph::Properties {
            self.0.attributes(representation, entity, response)
        }
        fn fetch_request(
            &self,
            request: &crate::query::FetchRequest,
            context: &RequestContext<'_>,
        ) -> Result<crate::adapter::WireRequest, AdapterError> {
            self.0.fetch_request(request, context)
        }
    }

    #[test]
    fn missing_capabilities_fail_at_construction() {
        let err = IncrementalStore::new(
            model(),
            Arc::new(ReadOnly(RestAdapter::new())),
            Arc::new(ScriptedTransport::new()),
            StoreConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::AdapterUnimplemented(_)));

        let read_only = StoreConfig {
            remote_saves: false,
            remote_faults: false,
            ..StoreConfig::default()
        };
        assert!(IncrementalStore::new(
            model(),
            Arc::new(ReadOnly(RestAdapter::new())),
            Arc::new(ScriptedTransport::new()),
            read_only,
        )
        .is_ok());
    }

    #[test]
    fn open_context_returns_the_same_root() {
        let store = IncrementalStore::new(
            model(),
            Arc::new(RestAdapter::new()),
            Arc::new(ScriptedTransport::new()),
            StoreConfig::default(),
        )
        .unwrap();

        let a = store.root_context().unwrap();
        let b = store.open_context("main").unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(store.contexts().len(), 1);

        let child = store.child_context(&a, "edit").unwrap();
        assert!(child.is_descendant_of(&a));
        assert_eq!(store.contexts().len(), 2);

        assert!(store.close_context(&a.id()).is_some());
        assert_ne!(store.root_context().unwrap().id(), a.id());
    }

    #[test]
    fn merges_persist_and_rehydrate() {
        let backing: Arc<dyn GraphStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = IncrementalStore::new(
            model(),
            Arc::new(RestAdapter::new()),
            Arc::new(ScriptedTransport::new()),
            StoreConfig::default(),
        )
        .unwrap()
        .with_backing_store(Arc::clone(&backing));

        let context = store.root_context().unwrap();
        let response = WireResponse::ok(serde_json::json!({"id": "1", "title": "A"}));
        let rep = response.body.as_object().cloned().unwrap();
        let (id, report) = store.merge_lineage(&context, &response, |merger| merger.merge("Post", &rep));
        let id = id.unwrap();
        assert_eq!(report.created, vec![id]);
        assert_eq!(backing.load_objects("main").unwrap().len(), 1);

        // A second store over the same backing sees the object offline.
        let reopened = IncrementalStore::new(
            model(),
            Arc::new(RestAdapter::new()),
            Arc::new(ScriptedTransport::new()),
            StoreConfig::default(),
        )
        .unwrap()
        .with_backing_store(backing);
        let restored = reopened.root_context().unwrap();
        assert_eq!(restored.lookup("Post", &"1".into()), Some(id));
    }

    #[test]
    fn reference_registers_one_fault_per_resource() {
        let store = IncrementalStore::new(
            model(),
            Arc::new(RestAdapter::new()),
            Arc::new(ScriptedTransport::new()),
            StoreConfig::default(),
        )
        .unwrap();
        let context = store.root_context().unwrap();

        let a = store.reference(&context, "Post", &"9".into()).unwrap();
        let b = store.reference(&context, "Post", &"9".into()).unwrap();
        assert_eq!(a, b);
        assert!(!context.object(&a).unwrap().attributes_materialized);
        assert!(matches!(
            store.reference(&context, "Nope", &"9".into()),
            Err(StoreError::UnknownEntity(_))
        ));
    }

    #[test]
    fn requests_need_a_runtime() {
        let store = IncrementalStore::new(
            model(),
            Arc::new(RestAdapter::new()),
            Arc::new(ScriptedTransport::new()),
            StoreConfig::default(),
        )
        .unwrap();
        assert!(matches!(store.runtime(), Err(StoreError::NoRuntime)));
    }
}
