//! Cache merger: integrates decoded representations into a local graph
//!
//! One `CacheMerger` covers one merge pass over one context's graph. Objects
//! are resolved through the identity map, so merging a representation whose
//! identifier is already known updates that object in place. Nested
//! relationship representations are merged recursively; a memo of the
//! identifiers currently being merged stops cycles.

use crate::adapter::{Representation, Representations, ResourceAdapter, WireResponse};
use crate::graph::{
    EntityDescriptor, GraphError, IdentityViolation, LocalGraph, ManagedObject, Model, ObjectId,
    Properties, RelationshipDescriptor, ResourceId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort the merge of one representation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("{entity} representation has no resource identifier")]
    MissingIdentifier { entity: String },

    #[error(transparent)]
    Identity(#[from] IdentityViolation),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl MergeError {
    fn from_graph(error: GraphError) -> Self {
        match error {
            GraphError::Identity(violation) => Self::Identity(violation),
            other => Self::Graph(other),
        }
    }
}

/// A field of a representation the schema does not know; skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeConflict {
    UnknownAttribute { entity: String, attribute: String },
    UnknownRelationship { entity: String, relationship: String },
}

/// A representation whose merge failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRejection {
    pub entity: String,
    pub resource_id: Option<ResourceId>,
    pub error: MergeError,
}

/// What one merge pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub created: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub conflicts: Vec<MergeConflict>,
    pub rejected: Vec<MergeRejection>,
}

impl MergeReport {
    /// Objects created or updated by the pass
    pub fn touched(&self) -> Vec<ObjectId> {
        self.created.iter().chain(self.updated.iter()).copied().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.rejected.is_empty()
    }
}

pub(crate) struct CacheMerger<'a> {
    adapter: &'a dyn ResourceAdapter,
    response: &'a WireResponse,
    graph: &'a mut LocalGraph,
    model: Arc<Model>,
    in_progress: HashMap<(String, ResourceId), ObjectId>,
    report: MergeReport,
}

impl<'a> CacheMerger<'a> {
    pub(crate) fn new(
        adapter: &'a dyn ResourceAdapter,
        response: &'a WireResponse,
        graph: &'a mut LocalGraph,
    ) -> Self {
        let model = graph.shared_model();
        Self {
            adapter,
            response,
            graph,
            model,
            in_progress: HashMap::new(),
            report: MergeReport::default(),
        }
    }

    /// Merge every representation, recording failures instead of stopping.
    pub(crate) fn merge_all(&mut self, entity: &str, representations: Representations) -> Vec<ObjectId> {
        representations
            .into_vec()
            .iter()
            .filter_map(|rep| self.merge_or_reject(entity, rep))
            .collect()
    }

    /// Merge one representation, returning the local object it resolves to.
    pub(crate) fn merge(&mut self, entity: &str, representation: &Representation) -> Result<ObjectId, MergeError> {
        let model = Arc::clone(&self.model);
        let descriptor = model
            .entity(entity)
            .ok_or_else(|| MergeError::UnknownEntity(entity.to_string()))?;
        let resource_id = self
            .adapter
            .resource_identifier(representation, descriptor, self.response)
            .ok_or_else(|| MergeError::MissingIdentifier {
                entity: entity.to_string(),
            })?;

        let key = (model.root_of(entity).to_string(), resource_id.clone());
        if let Some(id) = self.in_progress.get(&key) {
            return Ok(*id);
        }

        let id = match self.graph.lookup(entity, &resource_id) {
            Some(existing) => {
                self.reconcile_entity(existing, entity, &resource_id)?;
                if !self.report.updated.contains(&existing) && !self.report.created.contains(&existing) {
                    self.report.updated.push(existing);
                }
                existing
            }
            None => {
                let id = self.graph.create_fault(entity);
                if let Err(error) = self.graph.bind(id, &resource_id) {
                    self.graph.remove_object(id);
                    return Err(MergeError::from_graph(error));
                }
                self.report.created.push(id);
                id
            }
        };

        self.apply(key, id, descriptor, representation)?;
        Ok(id)
    }

    /// Merge a representation into a known object, binding the identifier it
    /// carries. Used for write echoes; clears the object's pending edits.
    pub(crate) fn merge_into(&mut self, id: ObjectId, representation: &Representation) -> Result<(), MergeError> {
        let model = Arc::clone(&self.model);
        let object = self
            .graph
            .object(&id)
            .ok_or(MergeError::Graph(GraphError::ObjectNotFound(id)))?;
        let entity = object.entity.clone();
        let known = object.resource_id.clone();
        let descriptor = model
            .entity(&entity)
            .ok_or_else(|| MergeError::UnknownEntity(entity.clone()))?;

        let resource_id = self
            .adapter
            .resource_identifier(representation, descriptor, self.response)
            .or(known)
            .ok_or_else(|| MergeError::MissingIdentifier {
                entity: entity.clone(),
            })?;
        self.graph.bind(id, &resource_id).map_err(MergeError::from_graph)?;
        self.graph.mark_saved(id);
        if !self.report.updated.contains(&id) {
            self.report.updated.push(id);
        }

        let key = (model.root_of(&entity).to_string(), resource_id);
        self.apply(key, id, descriptor, representation)
    }

    /// Merge the contents of one relationship of an object known by its
    /// identifier. Returns the owner and the slot's resulting membership.
    pub(crate) fn merge_related(
        &mut self,
        owner_entity: &str,
        owner: &ResourceId,
        relationship: &RelationshipDescriptor,
        representations: Representations,
    ) -> Result<(ObjectId, Vec<ObjectId>), MergeError> {
        let owner_id = match self.graph.lookup(owner_entity, owner) {
            Some(id) => id,
            None => {
                // An ancestor may not have seen the owner yet.
                let id = self.graph.create_fault(owner_entity);
                if let Err(error) = self.graph.bind(id, owner) {
                    self.graph.remove_object(id);
                    return Err(MergeError::from_graph(error));
                }
                self.report.created.push(id);
                id
            }
        };

        let targets = self.merge_all(&relationship.target, representations);
        let append = relationship.is_to_many() && self.adapter.appends_to_many(relationship);
        self.graph
            .replace_related(owner_id, &relationship.name, targets, append)
            .map_err(MergeError::from_graph)?;
        if !self.report.created.contains(&owner_id) && !self.report.updated.contains(&owner_id) {
            self.report.updated.push(owner_id);
        }

        let related = self
            .graph
            .object(&owner_id)
            .and_then(|object| object.relationship(&relationship.name))
            .map(|value| value.targets())
            .unwrap_or_default();
        Ok((owner_id, related))
    }

    pub(crate) fn finish(self) -> MergeReport {
        if !self.report.is_clean() {
            tracing::warn!(
                conflicts = self.report.conflicts.len(),
                rejected = self.report.rejected.len(),
                "merge skipped parts of the response"
            );
        }
        self.report
    }

    fn merge_or_reject(&mut self, entity: &str, representation: &Representation) -> Option<ObjectId> {
        match self.merge(entity, representation) {
            Ok(id) => Some(id),
            Err(error) => {
                let resource_id = self.model.entity(entity).and_then(|descriptor| {
                    self.adapter
                        .resource_identifier(representation, descriptor, self.response)
                });
                match &error {
                    MergeError::Identity(violation) => {
                        tracing::warn!(entity, %violation, "identity violation, representation rejected")
                    }
                    other => tracing::debug!(entity, error = %other, "representation rejected"),
                }
                self.report.rejected.push(MergeRejection {
                    entity: entity.to_string(),
                    resource_id,
                    error,
                });
                None
            }
        }
    }

    /// An identifier already bound to a related entity: narrow to the more
    /// specific entity, refuse siblings.
    fn reconcile_entity(&mut self, existing: ObjectId, entity: &str, resource_id: &ResourceId) -> Result<(), MergeError> {
        let Some(object) = self.graph.object_mut(&existing) else {
            return Err(MergeError::Graph(GraphError::ObjectNotFound(existing)));
        };
        if object.entity == entity || self.model.is_kind_of(&object.entity, entity) {
            return Ok(());
        }
        if self.model.is_kind_of(entity, &object.entity) {
            object.entity = entity.to_string();
            return Ok(());
        }
        Err(MergeError::Identity(IdentityViolation::IncompatibleEntity {
            entity: entity.to_string(),
            existing_entity: object.entity.clone(),
            resource_id: resource_id.clone(),
        }))
    }

    fn apply(
        &mut self,
        key: (String, ResourceId),
        id: ObjectId,
        descriptor: &EntityDescriptor,
        representation: &Representation,
    ) -> Result<(), MergeError> {
        self.in_progress.insert(key.clone(), id);
        let result = self.apply_fields(id, descriptor, representation);
        self.in_progress.remove(&key);
        result
    }

    fn apply_fields(
        &mut self,
        id: ObjectId,
        descriptor: &EntityDescriptor,
        representation: &Representation,
    ) -> Result<(), MergeError> {
        let attributes: Properties = self
            .adapter
            .attributes(representation, descriptor, self.response);
        let materialized = !attributes.is_empty();
        for (name, value) in attributes {
            if descriptor.attribute(&name).is_none() {
                self.conflict(MergeConflict::UnknownAttribute {
                    entity: descriptor.name.clone(),
                    attribute: name,
                });
                continue;
            }
            if !self.graph.write_remote_attribute(id, &name, value) {
                tracing::trace!(object = %id, attribute = %name, "unsaved local edit kept");
            }
        }
        self.graph.touch_merged(id, materialized);

        let nested: BTreeMap<String, Representations> = self
            .adapter
            .relationship_representations(representation, descriptor, self.response);
        for (name, representations) in nested {
            let Some(relationship) = descriptor.relationship(&name) else {
                self.conflict(MergeConflict::UnknownRelationship {
                    entity: descriptor.name.clone(),
                    relationship: name,
                });
                continue;
            };
            let targets = self.merge_all(&relationship.target, representations);
            let append = relationship.is_to_many() && self.adapter.appends_to_many(relationship);
            self.graph
                .replace_related(id, &name, targets, append)
                .map_err(MergeError::from_graph)?;
        }
        Ok(())
    }

    fn conflict(&mut self, conflict: MergeConflict) {
        tracing::debug!(?conflict, "field not in schema, skipped");
        self.report.conflicts.push(conflict);
    }
}

/// Resource-identifier snapshot of an object, for replaying a committed
/// write into another context whose object ids differ.
#[derive(Debug, Clone)]
pub(crate) struct ObjectImage {
    entity: String,
    resource_id: ResourceId,
    attributes: Properties,
    materialized: bool,
    relationships: Vec<(String, Vec<(String, ResourceId)>)>,
}

impl ObjectImage {
    /// Capture a synchronized object. Related objects without an identifier
    /// are left out.
    pub(crate) fn capture(graph: &LocalGraph, id: ObjectId) -> Option<Self> {
        let object: &ManagedObject = graph.object(&id)?;
        let resource_id = object.resource_id.clone()?;
        let relationships = object
            .relationships
            .iter()
            .map(|(name, value)| {
                let targets = value
                    .targets()
                    .iter()
                    .filter_map(|t| graph.object(t))
                    .filter_map(|t| Some((t.entity.clone(), t.resource_id.clone()?)))
                    .collect();
                (name.clone(), targets)
            })
            .collect();
        Some(Self {
            entity: object.entity.clone(),
            resource_id,
            attributes: object.attributes.clone(),
            materialized: object.attributes_materialized,
            relationships,
        })
    }

    /// Replay into `graph`, creating the object or faults for its related
    /// objects as needed. Returns the local id.
    pub(crate) fn apply(&self, graph: &mut LocalGraph) -> Result<ObjectId, GraphError> {
        let id = self.resolve(graph, &self.entity, &self.resource_id)?;
        for (name, value) in &self.attributes {
            graph.write_remote_attribute(id, name, value.clone());
        }
        graph.touch_merged(id, self.materialized);

        for (name, targets) in &self.relationships {
            let local = targets
                .iter()
                .map(|(entity, rid)| self.resolve(graph, entity, rid))
                .collect::<Result<Vec<_>, _>>()?;
            graph.replace_related(id, name, local, false)?;
        }
        Ok(id)
    }

    fn resolve(&self, graph: &mut LocalGraph, entity: &str, rid: &ResourceId) -> Result<ObjectId, GraphError> {
        if let Some(id) = graph.lookup(entity, rid) {
            return Ok(id);
        }
        let id = graph.create_fault(entity);
        if let Err(error) = graph.bind(id, rid) {
            graph.remove_object(id);
            return Err(error);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterCapabilities, AdapterError, RequestContext, RestAdapter};
    use crate::graph::{AttributeType, PropertyValue, RelationshipValue};
    use crate::query::FetchRequest;
    use serde_json::{json, Value};

    /// Passes `subtitle` and `tags` through even though no schema has them.
    struct LooseAdapter(RestAdapter);

    impl ResourceAdapter for LooseAdapter {
        fn capabilities(&self) -> AdapterCapabilities {
            self.0.capabilities()
        }

        fn representations(
            &self,
            entity: &EntityDescriptor,
            response: &WireResponse,
        ) -> Result<Representations, AdapterError> {
            self.0.representations(entity, response)
        }

        fn relationship_representations(
            &self,
            representation: &Representation,
            entity: &EntityDescriptor,
            response: &WireResponse,
        ) -> BTreeMap<String, Representations> {
            let mut nested = self.0.relationship_representations(representation, entity, response);
            if let Some(Value::Array(tags)) = representation.get("tags") {
                let tags = tags.iter().filter_map(|t| t.as_object().cloned()).collect();
                nested.insert("tags".into(), Representations::Many(tags));
            }
            nested
        }

        fn resource_identifier(
            &self,
            representation: &Representation,
            entity: &EntityDescriptor,
            response: &WireResponse,
        ) -> Option<ResourceId> {
            self.0.resource_identifier(representation, entity, response)
        }

        fn attributes(
            &self,
            representation: &Representation,
            entity: &EntityDescriptor,
            response: &WireResponse,
        ) -> Properties {
            let mut attributes = self.0.attributes(representation, entity, response);
            if let Some(Value::String(subtitle)) = representation.get("subtitle") {
                attributes.insert("subtitle".into(), PropertyValue::from(subtitle.as_str()));
            }
            attributes
        }

        fn fetch_request(
            &self,
            request: &FetchRequest,
            context: &RequestContext<'_>,
        ) -> Result<crate::adapter::WireRequest, AdapterError> {
            self.0.fetch_request(request, context)
        }
    }

    /// True if the slot is materialized with exactly these targets.
    fn links_to(value: Option<&RelationshipValue>, targets: &[ObjectId]) -> bool {
        value.map(|v| v.targets() == targets).unwrap_or(false)
    }

    fn model() -> Arc<Model> {
        Arc::new(
            Model::new(vec![
                EntityDescriptor::new("Post")
                    .with_attribute("title", AttributeType::String)
                    .with_to_many("comments", "Comment", Some("post"))
                    .with_to_one("author", "User", None),
                EntityDescriptor::new("Comment")
                    .with_attribute("body", AttributeType::String)
                    .with_to_one("post", "Post", Some("comments")),
                EntityDescriptor::new("User")
                    .with_attribute("name", AttributeType::String)
                    .with_to_many("posts", "Post", None),
                EntityDescriptor::new("Media"),
                EntityDescriptor::new("Photo").with_parent("Media"),
                EntityDescriptor::new("Video").with_parent("Media"),
            ])
            .unwrap(),
        )
    }

    fn rep(value: Value) -> Representation {
        value.as_object().cloned().unwrap()
    }

    fn response() -> WireResponse {
        WireResponse::ok(Value::Null)
    }

    #[test]
    fn merge_creates_then_updates_in_place() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());

        let first = {
            let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
            let id = merger.merge("Post", &rep(json!({"id": "1", "title": "A"}))).unwrap();
            assert_eq!(merger.finish().created, vec![id]);
            id
        };
        let second = {
            let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
            let id = merger.merge("Post", &rep(json!({"id": "1", "title": "B"}))).unwrap();
            assert_eq!(merger.finish().updated, vec![id]);
            id
        };

        assert_eq!(first, second);
        assert_eq!(graph.object_count(), 1);
        let object = graph.object(&first).unwrap();
        assert_eq!(object.attribute("title"), Some(&PropertyValue::from("B")));
        assert!(object.attributes_materialized);
        assert!(!object.has_pending_edits());
    }

    #[test]
    fn nested_relationships_link_by_identifier() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);

        let post = merger
            .merge(
                "Post",
                &rep(json!({
                    "id": "1",
                    "title": "A",
                    "comments": [{"id": "c1", "body": "x"}, "c2"],
                    "author": {"id": "u1", "name": "Ann"}
                })),
            )
            .unwrap();
        merger.finish();

        let object = graph.object(&post).unwrap();
        let comments: Vec<ResourceId> = object
            .relationship("comments")
            .unwrap()
            .targets()
            .iter()
            .filter_map(|id| graph.object(id)?.resource_id.clone())
            .collect();
        assert_eq!(comments, vec![ResourceId::from("c1"), ResourceId::from("c2")]);

        // Bare identifiers produce faults; inverses point back at the post.
        let c2 = graph.lookup("Comment", &"c2".into()).unwrap();
        assert!(!graph.object(&c2).unwrap().attributes_materialized);
        assert!(links_to(graph.object(&c2).unwrap().relationship("post"), &[post]));
    }

    #[test]
    fn cyclic_representation_terminates() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);

        let user = merger
            .merge(
                "User",
                &rep(json!({
                    "id": "u1",
                    "name": "Ann",
                    "posts": [{"id": "p1", "title": "t", "author": {"id": "u1", "name": "Ann"}}]
                })),
            )
            .unwrap();
        merger.finish();

        let post = graph.lookup("Post", &"p1".into()).unwrap();
        assert!(links_to(graph.object(&post).unwrap().relationship("author"), &[user]));
        assert_eq!(graph.object_count(), 2);
    }

    #[test]
    fn null_to_one_clears_and_absent_leaves_untouched() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
        let comment = merger
            .merge("Comment", &rep(json!({"id": "c1", "post": {"id": "p1"}})))
            .unwrap();
        merger.merge("Comment", &rep(json!({"id": "c1", "body": "edited"}))).unwrap();
        merger.finish();
        assert_eq!(graph.object(&comment).unwrap().relationship("post").unwrap().targets().len(), 1);

        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
        merger.merge("Comment", &rep(json!({"id": "c1", "post": null}))).unwrap();
        merger.finish();
        assert!(graph.object(&comment).unwrap().relationship("post").unwrap().targets().is_empty());
    }

    #[test]
    fn local_edits_survive_merge() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let post = {
            let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
            merger.merge("Post", &rep(json!({"id": "1", "title": "server"}))).unwrap()
        };
        graph.set_attribute(post, "title", "mine").unwrap();

        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
        merger.merge("Post", &rep(json!({"id": "1", "title": "newer"}))).unwrap();
        merger.finish();
        assert_eq!(
            graph.object(&post).unwrap().attribute("title"),
            Some(&PropertyValue::from("mine"))
        );
    }

    #[test]
    fn sibling_entities_cannot_share_identifier() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);

        let photo = merger.merge("Photo", &rep(json!({"id": "m1"}))).unwrap();
        let err = merger.merge("Video", &rep(json!({"id": "m1"}))).unwrap_err();
        assert!(matches!(err, MergeError::Identity(IdentityViolation::IncompatibleEntity { .. })));

        // The general entity resolves to the existing specific object.
        assert_eq!(merger.merge("Media", &rep(json!({"id": "m1"}))).unwrap(), photo);
        merger.finish();
        assert_eq!(graph.object(&photo).unwrap().entity, "Photo");
    }

    #[test]
    fn merge_all_records_rejections() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);

        let ids = merger.merge_all(
            "Post",
            Representations::Many(vec![rep(json!({"title": "no id"})), rep(json!({"id": "2"}))]),
        );
        let report = merger.finish();
        assert_eq!(ids.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(report.rejected[0].error, MergeError::MissingIdentifier { .. }));
    }

    #[test]
    fn merge_into_binds_server_identifier() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let post = graph.insert("Post").unwrap();
        graph.set_attribute(post, "title", "draft").unwrap();

        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
        merger.merge_into(post, &rep(json!({"id": "42", "title": "draft"}))).unwrap();
        merger.finish();

        assert_eq!(graph.lookup("Post", &"42".into()), Some(post));
        assert!(!graph.has_changes());
    }

    #[test]
    fn merge_related_faults_unknown_owner() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut graph = LocalGraph::new(model());
        let model = model();
        let relationship = model.entity("Post").unwrap().relationship("comments").unwrap();

        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);
        let (owner, related) = merger
            .merge_related(
                "Post",
                &"p9".into(),
                relationship,
                Representations::Many(vec![rep(json!({"id": "c1"})), rep(json!({"id": "c2"}))]),
            )
            .unwrap();
        let report = merger.finish();

        assert_eq!(graph.lookup("Post", &"p9".into()), Some(owner));
        assert_eq!(related.len(), 2);
        assert_eq!(report.created.len(), 3);
        assert!(!graph.object(&owner).unwrap().attributes_materialized);
    }

    #[test]
    fn image_replays_into_another_graph() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut source = LocalGraph::new(model());
        let post = {
            let mut merger = CacheMerger::new(&adapter, &response, &mut source);
            merger
                .merge("Post", &rep(json!({"id": "1", "title": "A", "comments": ["c1"]})))
                .unwrap()
        };

        let mut target = LocalGraph::new(model());
        let image = ObjectImage::capture(&source, post).unwrap();
        let replayed = image.apply(&mut target).unwrap();

        assert_ne!(replayed, post);
        assert_eq!(target.lookup("Post", &"1".into()), Some(replayed));
        let comment = target.lookup("Comment", &"c1".into()).unwrap();
        assert!(links_to(target.object(&replayed).unwrap().relationship("comments"), &[comment]));
    }

    #[test]
    fn unknown_fields_are_reported_and_known_fields_merge() {
        let adapter = LooseAdapter(RestAdapter::new());
        let response = response();
        let mut graph = LocalGraph::new(model());
        let mut merger = CacheMerger::new(&adapter, &response, &mut graph);

        let post = merger
            .merge(
                "Post",
                &rep(json!({
                    "id": "1",
                    "title": "A",
                    "subtitle": "not modelled",
                    "author": {"id": "u1", "name": "Ann"},
                    "tags": [{"id": "t1"}]
                })),
            )
            .unwrap();
        let report = merger.finish();

        assert!(report.conflicts.contains(&MergeConflict::UnknownAttribute {
            entity: "Post".into(),
            attribute: "subtitle".into(),
        }));
        assert!(report.conflicts.contains(&MergeConflict::UnknownRelationship {
            entity: "Post".into(),
            relationship: "tags".into(),
        }));
        assert_eq!(report.conflicts.len(), 2);
        assert!(report.rejected.is_empty());
        assert!(!report.is_clean());

        let object = graph.object(&post).unwrap();
        assert_eq!(object.attribute("title"), Some(&PropertyValue::from("A")));
        assert_eq!(object.attribute("subtitle"), None);
        let author = graph.lookup("User", &"u1".into()).unwrap();
        assert!(links_to(object.relationship("author"), &[author]));
        assert_eq!(graph.object_count(), 2);
    }

    #[test]
    fn image_replay_keeps_unsaved_edits() {
        let adapter = RestAdapter::new();
        let response = response();
        let mut source = LocalGraph::new(model());
        let mut target = LocalGraph::new(model());
        let seed = rep(json!({"id": "1", "title": "server"}));
        let post = {
            let mut merger = CacheMerger::new(&adapter, &response, &mut source);
            merger.merge("Post", &seed).unwrap()
        };
        let mirrored = {
            let mut merger = CacheMerger::new(&adapter, &response, &mut target);
            merger.merge("Post", &seed).unwrap()
        };
        target.set_attribute(mirrored, "title", "draft").unwrap();

        let mut merger = CacheMerger::new(&adapter, &response, &mut source);
        merger.merge("Post", &rep(json!({"id": "1", "title": "committed"}))).unwrap();
        merger.finish();
        let image = ObjectImage::capture(&source, post).unwrap();
        assert_eq!(image.apply(&mut target).unwrap(), mirrored);

        let object = target.object(&mirrored).unwrap();
        assert_eq!(object.attribute("title"), Some(&PropertyValue::from("draft")));
        assert!(object.has_pending_edits());
    }
}
