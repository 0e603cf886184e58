//! Fault resolver
//!
//! Materializes one object's attributes or one of its relationships. The
//! pipeline is the fetch pipeline scoped to a single object: network
//! decision, adapter object request, merge into the context lineage.
//! Identical concurrent faults are not coalesced here.

use super::context::StoreContext;
use super::dispatch::{Completion, CompletionCallback, CompletionPayload, RequestKind, RequestToken};
use super::engine::{IncrementalStore, StoreError, StoreResult};
use crate::adapter::{AdapterError, CancellationToken, Method, RequestTarget, WireRequest};
use crate::graph::{ManagedObject, ObjectId, RelationshipDescriptor, ResourceId};
use std::sync::Arc;
use tokio::sync::oneshot;

impl IncrementalStore {
    /// Start materializing an object's attributes.
    ///
    /// Returns `None` when no request was needed or allowed; the callback
    /// has then fired with `materialized` telling whether the attributes are
    /// available.
    pub fn start_attribute_fault(
        &self,
        context: &Arc<StoreContext>,
        id: ObjectId,
        callback: Option<CompletionCallback>,
    ) -> StoreResult<Option<RequestToken>> {
        let object = context.object(&id).ok_or(StoreError::ObjectNotFound(id))?;
        let immediate = |materialized: bool, callback: Option<CompletionCallback>| -> StoreResult<Option<RequestToken>> {
            if let Some(callback) = callback {
                callback(Completion::local(CompletionPayload::AttributesMaterialized {
                    object: id,
                    materialized,
                }));
            }
            Ok(None)
        };

        if object.attributes_materialized {
            return immediate(true, callback);
        }
        let Some(resource_id) = object.resource_id.clone() else {
            return immediate(false, callback);
        };
        if !self.may_fault(context) || !self.adapter().should_fetch_attributes(&object) {
            tracing::debug!(context = context.name(), object = %id, "attribute fault left in place");
            return immediate(false, callback);
        }

        let wire = self.adapter().object_request(
            Method::Get,
            RequestTarget::Object(&object),
            &self.request_context(context),
        )?;
        let runtime = self.runtime()?;
        let (token, cancel) = context
            .dispatcher()
            .begin(RequestKind::AttributeFault { object: id }, callback);

        let store = self.clone();
        let owner = Arc::clone(context);
        let entity = object.entity;
        let task = runtime.spawn(async move {
            let outcome = store
                .run_attribute_fault(&owner, id, &entity, &resource_id, wire, token, &cancel)
                .await
                .map_err(Arc::new);
            owner.dispatcher().finish(token, outcome);
        });
        context.dispatcher().attach(token, task.abort_handle());
        Ok(Some(token))
    }

    /// Start materializing one relationship of an object.
    pub fn start_relationship_fault(
        &self,
        context: &Arc<StoreContext>,
        id: ObjectId,
        relationship: &str,
        callback: Option<CompletionCallback>,
    ) -> StoreResult<Option<RequestToken>> {
        let object = context.object(&id).ok_or(StoreError::ObjectNotFound(id))?;
        let descriptor = self
            .model()
            .entity(&object.entity)
            .and_then(|entity| entity.relationship(relationship))
            .cloned()
            .ok_or_else(|| StoreError::UnknownRelationship {
                entity: object.entity.clone(),
                relationship: relationship.to_string(),
            })?;
        let immediate = |related: Vec<ObjectId>,
                         materialized: bool,
                         callback: Option<CompletionCallback>|
         -> StoreResult<Option<RequestToken>> {
            if let Some(callback) = callback {
                callback(Completion::local(CompletionPayload::RelationshipMaterialized {
                    object: id,
                    relationship: relationship.to_string(),
                    related,
                    materialized,
                }));
            }
            Ok(None)
        };

        if let Some(value) = object.relationship(relationship) {
            return immediate(value.targets(), true, callback);
        }
        let Some(resource_id) = object.resource_id.clone() else {
            return immediate(Vec::new(), false, callback);
        };
        if !self.may_fault(context) || !self.adapter().should_fetch_relationship(&object, &descriptor) {
            tracing::debug!(context = context.name(), object = %id, relationship, "relationship fault left in place");
            return immediate(Vec::new(), false, callback);
        }

        let wire = self.adapter().object_request(
            Method::Get,
            RequestTarget::Relationship {
                object: &object,
                relationship: &descriptor,
            },
            &self.request_context(context),
        )?;
        let runtime = self.runtime()?;
        let (token, cancel) = context.dispatcher().begin(
            RequestKind::RelationshipFault {
                object: id,
                relationship: relationship.to_string(),
            },
            callback,
        );

        let store = self.clone();
        let owner = Arc::clone(context);
        let entity = object.entity;
        let task = runtime.spawn(async move {
            let outcome = store
                .run_relationship_fault(&owner, id, &entity, &resource_id, &descriptor, wire, token, &cancel)
                .await
                .map_err(Arc::new);
            owner.dispatcher().finish(token, outcome);
        });
        context.dispatcher().attach(token, task.abort_handle());
        Ok(Some(token))
    }

    /// Materialize an object's attributes and return the object.
    ///
    /// If the fault could not be resolved (network suppressed, no
    /// identifier), the object is returned still faulted.
    pub async fn materialize_attributes(&self, context: &Arc<StoreContext>, id: ObjectId) -> StoreResult<ManagedObject> {
        let (tx, rx) = oneshot::channel();
        self.start_attribute_fault(context, id, Some(Box::new(move |c: Completion| {
            let _ = tx.send(c);
        })))?;
        let completion = rx.await.map_err(|_| StoreError::ChannelClosed)?;
        completion.outcome.map_err(Arc::unwrap_or_clone)?;
        context.object(&id).ok_or(StoreError::ObjectNotFound(id))
    }

    /// Materialize a relationship and return its targets.
    pub async fn materialize_relationship(
        &self,
        context: &Arc<StoreContext>,
        id: ObjectId,
        relationship: &str,
    ) -> StoreResult<Vec<ObjectId>> {
        let (tx, rx) = oneshot::channel();
        self.start_relationship_fault(
            context,
            id,
            relationship,
            Some(Box::new(move |c: Completion| {
                let _ = tx.send(c);
            })),
        )?;
        let completion = rx.await.map_err(|_| StoreError::ChannelClosed)?;
        match completion.outcome.map_err(Arc::unwrap_or_clone)? {
            CompletionPayload::RelationshipMaterialized { related, .. } => Ok(related),
            _ => Err(StoreError::TaskFailed("fault resolved with a foreign payload".into())),
        }
    }

    /// Faults honor the persistent suppression flag but never consume the
    /// one-shot flag, which belongs to the next fetch or save.
    fn may_fault(&self, context: &StoreContext) -> bool {
        self.config().remote_faults && !context.is_network_suppressed()
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attribute_fault(
        &self,
        context: &Arc<StoreContext>,
        id: ObjectId,
        entity: &str,
        resource_id: &ResourceId,
        wire: WireRequest,
        token: RequestToken,
        cancel: &CancellationToken,
    ) -> StoreResult<CompletionPayload> {
        let response = self.transport().execute(wire).await?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let descriptor = self
            .model()
            .entity(entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))?;
        let representation = self
            .adapter()
            .representations(descriptor, &response)?
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| {
                AdapterError::MalformedResponse(format!("empty response for {entity} {resource_id}"))
            })?;

        context.claim_commit(token)?;
        let (merged, _) = self.merge_lineage(context, &response, |merger| merger.merge(entity, &representation));
        let merged = merged?;
        if merged != id {
            tracing::warn!(object = %id, resolved = %merged, "fault response resolved to another object");
        }
        // The object was asked for; it is materialized even if the server
        // sent no attributes.
        context.perform(|graph| graph.touch_merged(id, true));
        Ok(CompletionPayload::AttributesMaterialized {
            object: id,
            materialized: true,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_relationship_fault(
        &self,
        context: &Arc<StoreContext>,
        id: ObjectId,
        entity: &str,
        resource_id: &ResourceId,
        relationship: &RelationshipDescriptor,
        wire: WireRequest,
        token: RequestToken,
        cancel: &CancellationToken,
    ) -> StoreResult<CompletionPayload> {
        let response = self.transport().execute(wire).await?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let target = self
            .model()
            .entity(&relationship.target)
            .ok_or_else(|| StoreError::UnknownEntity(relationship.target.clone()))?;
        let representations = self.adapter().representations(target, &response)?;
        context.claim_commit(token)?;
        let (merged, _) = self.merge_lineage(context, &response, |merger| {
            merger.merge_related(entity, resource_id, relationship, representations.clone())
        });
        let (_, related) = merged?;

        Ok(CompletionPayload::RelationshipMaterialized {
            object: id,
            relationship: relationship.name.clone(),
            related,
            materialized: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{RestAdapter, WireResponse};
    use crate::config::StoreConfig;
    use crate::graph::{AttributeType, EntityDescriptor, Model, PropertyValue};
    use crate::store::testing::ScriptedTransport;
    use serde_json::json;

    fn store(transport: Arc<ScriptedTransport>) -> IncrementalStore {
        let model = Model::new(vec![
            EntityDescriptor::new("Post")
                .with_attribute("title", AttributeType::String)
                .with_to_many("comments", "Comment", Some("post")),
            EntityDescriptor::new("Comment")
                .with_attribute("body", AttributeType::String)
                .with_to_one("post", "Post", Some("comments")),
        ])
        .unwrap();
        IncrementalStore::new(model, Arc::new(RestAdapter::new()), transport, StoreConfig::default()).unwrap()
    }

    fn fault(context: &StoreContext, rid: &str) -> ObjectId {
        context.perform(|graph| {
            let id = graph.create_fault("Post");
            graph.bind(id, &rid.into()).unwrap();
            id
        })
    }

    #[tokio::test]
    async fn attribute_fault_fetches_the_object() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(WireResponse::ok(json!({"id": "1", "title": "A"})));
        let store = store(Arc::clone(&transport));
        let context = store.root_context().unwrap();
        let post = fault(&context, "1");

        let object = store.materialize_attributes(&context, post).await.unwrap();
        assert!(object.attributes_materialized);
        assert_eq!(object.attribute("title"), Some(&PropertyValue::from("A")));
        assert_eq!(transport.requests()[0].path, "/posts/1");

        // Already materialized: no second request.
        store.materialize_attributes(&context, post).await.unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn relationship_fault_links_targets() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(WireResponse::ok(json!([{"id": "c1", "body": "x"}, {"id": "c2"}])));
        let store = store(Arc::clone(&transport));
        let context = store.root_context().unwrap();
        let post = fault(&context, "1");

        let related = store.materialize_relationship(&context, post, "comments").await.unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(transport.requests()[0].path, "/posts/1/comments");
        let c1 = context.lookup("Comment", &"c1".into()).unwrap();
        assert!(context.object(&post).unwrap().relationship("comments").unwrap().contains(&c1));
    }

    #[tokio::test]
    async fn suppressed_fault_stays_a_fault() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store(Arc::clone(&transport));
        let context = store.root_context().unwrap();
        let post = fault(&context, "1");
        context.set_network_suppressed(true);

        let object = store.materialize_attributes(&context, post).await.unwrap();
        assert!(!object.attributes_materialized);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn fault_does_not_consume_one_shot_suppression() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(WireResponse::ok(json!({"id": "1", "title": "A"})));
        let store = store(Arc::clone(&transport));
        let context = store.root_context().unwrap();
        let post = fault(&context, "1");
        context.suppress_network_once();

        store.materialize_attributes(&context, post).await.unwrap();
        assert!(context.take_network_suppression());
    }

    #[tokio::test]
    async fn unknown_relationship_is_an_error() {
        let store = store(Arc::new(ScriptedTransport::new()));
        let context = store.root_context().unwrap();
        let post = fault(&context, "1");
        let err = store.start_relationship_fault(&context, post, "tags", None).unwrap_err();
        assert!(matches!(err, StoreError::UnknownRelationship { .. }));
    }
}
