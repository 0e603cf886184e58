//! LocalGraph: the in-memory object graph of one context
//!
//! Holds objects, the context's identity map, and the change sets that a
//! save turns into write requests. Mutations made by callers are tracked as
//! pending changes; mutations made while merging remote state are not.

use super::identity::{IdentityMap, IdentityViolation};
use super::object::{ManagedObject, ObjectId, PropertyValue, RelationshipValue, ResourceId};
use super::schema::{Cardinality, Model, RelationshipDescriptor};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Errors from local graph operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("{entity} has no attribute {attribute}")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("{entity} has no relationship {relationship}")]
    UnknownRelationship { entity: String, relationship: String },

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("{entity}.{relationship} has the wrong cardinality for this operation")]
    CardinalityMismatch { entity: String, relationship: String },

    #[error("{relationship} expects {expected}, got {found}")]
    TargetMismatch {
        relationship: String,
        expected: String,
        found: String,
    },

    #[error("relationship {relationship} of {object} is not materialized")]
    RelationshipFault { object: ObjectId, relationship: String },

    #[error(transparent)]
    Identity(#[from] IdentityViolation),
}

/// The object graph of one context
#[derive(Debug, Clone)]
pub struct LocalGraph {
    model: Arc<Model>,
    objects: HashMap<ObjectId, ManagedObject>,
    identity: IdentityMap,
    inserted: BTreeSet<ObjectId>,
    updated: BTreeSet<ObjectId>,
    deleted: BTreeSet<ObjectId>,
}

impl LocalGraph {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            objects: HashMap::new(),
            identity: IdentityMap::new(),
            inserted: BTreeSet::new(),
            updated: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub(crate) fn shared_model(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    // === Reads ===

    /// Get an object, including objects pending deletion
    pub fn object(&self, id: &ObjectId) -> Option<&ManagedObject> {
        self.objects.get(id)
    }

    /// Objects not pending deletion
    pub fn objects(&self) -> impl Iterator<Item = &ManagedObject> {
        self.objects.values().filter(|o| !self.deleted.contains(&o.id))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len() - self.deleted.len()
    }

    /// Resolve a resource identifier through the identity map
    pub fn lookup(&self, entity: &str, id: &ResourceId) -> Option<ObjectId> {
        self.identity.lookup(self.model.root_of(entity), id)
    }

    pub fn is_deleted(&self, id: &ObjectId) -> bool {
        self.deleted.contains(id)
    }

    pub fn has_changes(&self) -> bool {
        !(self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }

    pub fn inserted_objects(&self) -> impl Iterator<Item = &ObjectId> {
        self.inserted.iter()
    }

    pub fn updated_objects(&self) -> impl Iterator<Item = &ObjectId> {
        self.updated.iter()
    }

    pub fn deleted_objects(&self) -> impl Iterator<Item = &ObjectId> {
        self.deleted.iter()
    }

    // === Caller mutations (change-tracked) ===

    /// Insert a new local object. It stays pending until saved.
    pub fn insert(&mut self, entity: &str) -> Result<ObjectId, GraphError> {
        let descriptor = self
            .model
            .entity(entity)
            .ok_or_else(|| GraphError::UnknownEntity(entity.to_string()))?;

        let mut object = ManagedObject::new(entity);
        object.attributes_materialized = true;
        for rel in descriptor.relationships.values() {
            let empty = match rel.cardinality {
                Cardinality::ToOne => RelationshipValue::ToOne(None),
                Cardinality::ToMany => RelationshipValue::ToMany(Vec::new()),
            };
            object.relationships.insert(rel.name.clone(), empty);
        }

        let id = object.id;
        self.objects.insert(id, object);
        self.inserted.insert(id);
        Ok(id)
    }

    pub fn set_attribute(
        &mut self,
        id: ObjectId,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), GraphError> {
        let model = Arc::clone(&self.model);
        let object = self.live_object_mut(id)?;
        let known = model
            .entity(&object.entity)
            .and_then(|e| e.attribute(name))
            .is_some();
        if !known {
            return Err(GraphError::UnknownAttribute {
                entity: object.entity.clone(),
                attribute: name.to_string(),
            });
        }
        object.attributes.insert(name.to_string(), value.into());
        object.changed.insert(name.to_string());
        self.mark_updated(id);
        Ok(())
    }

    pub fn set_to_one(
        &mut self,
        id: ObjectId,
        name: &str,
        target: Option<ObjectId>,
    ) -> Result<(), GraphError> {
        self.expect_cardinality(id, name, Cardinality::ToOne)?;
        self.replace_related(id, name, target.into_iter().collect(), false)?;
        self.mark_updated(id);
        Ok(())
    }

    pub fn add_to_many(&mut self, id: ObjectId, name: &str, target: ObjectId) -> Result<(), GraphError> {
        self.expect_cardinality(id, name, Cardinality::ToMany)?;
        self.expect_materialized(id, name)?;
        self.replace_related(id, name, vec![target], true)?;
        self.mark_updated(id);
        Ok(())
    }

    pub fn remove_from_many(
        &mut self,
        id: ObjectId,
        name: &str,
        target: ObjectId,
    ) -> Result<(), GraphError> {
        self.expect_cardinality(id, name, Cardinality::ToMany)?;
        self.expect_materialized(id, name)?;
        let remaining: Vec<ObjectId> = self
            .objects
            .get(&id)
            .and_then(|o| o.relationship(name))
            .map(|v| v.targets())
            .unwrap_or_default()
            .into_iter()
            .filter(|t| *t != target)
            .collect();
        self.replace_related(id, name, remaining, false)?;
        self.mark_updated(id);
        Ok(())
    }

    /// Delete an object.
    ///
    /// Objects never saved are dropped at once; synchronized objects stay
    /// (hidden from queries) until the save that deletes them remotely.
    pub fn delete(&mut self, id: ObjectId) -> Result<(), GraphError> {
        self.live_object_mut(id)?;
        if self.inserted.contains(&id) {
            self.remove_object(id);
        } else {
            self.updated.remove(&id);
            self.deleted.insert(id);
        }
        Ok(())
    }

    /// Turn a synchronized object back into a fault so the next access
    /// reloads it. Objects with unsaved edits are left alone.
    pub fn refresh(&mut self, id: ObjectId) -> Result<bool, GraphError> {
        let pending = self.inserted.contains(&id) || self.updated.contains(&id);
        let object = self.live_object_mut(id)?;
        if pending || object.resource_id.is_none() {
            return Ok(false);
        }
        object.attributes.clear();
        object.attributes_materialized = false;
        object.relationships.clear();
        Ok(true)
    }

    // === Merge primitives (not change-tracked) ===

    /// Allocate an unmaterialized object for a remote resource.
    pub(crate) fn create_fault(&mut self, entity: &str) -> ObjectId {
        let object = ManagedObject::new(entity);
        let id = object.id;
        self.objects.insert(id, object);
        id
    }

    /// Bind a resource identifier to an object through the identity map.
    pub(crate) fn bind(&mut self, id: ObjectId, resource_id: &ResourceId) -> Result<(), GraphError> {
        let model = Arc::clone(&self.model);
        let object = self.objects.get_mut(&id).ok_or(GraphError::ObjectNotFound(id))?;
        self.identity
            .bind(model.root_of(&object.entity), resource_id, id)?;
        object.resource_id = Some(resource_id.clone());
        Ok(())
    }

    pub(crate) fn object_mut(&mut self, id: &ObjectId) -> Option<&mut ManagedObject> {
        self.objects.get_mut(id)
    }

    /// Write a server-provided attribute unless the caller has an unsaved edit to it.
    pub(crate) fn write_remote_attribute(&mut self, id: ObjectId, name: &str, value: PropertyValue) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) if !object.changed.contains(name) => {
                object.attributes.insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn touch_merged(&mut self, id: ObjectId, materialized: bool) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.attributes_materialized |= materialized;
            object.metadata.merged_at = Some(Utc::now());
        }
    }

    /// Set a relationship slot to the given targets, maintaining inverses.
    ///
    /// With `append`, targets are added to the current membership instead of
    /// replacing it.
    pub(crate) fn replace_related(
        &mut self,
        id: ObjectId,
        name: &str,
        targets: Vec<ObjectId>,
        append: bool,
    ) -> Result<(), GraphError> {
        let model = Arc::clone(&self.model);
        let object = self.objects.get(&id).ok_or(GraphError::ObjectNotFound(id))?;
        let rel = relationship_of(&model, &object.entity, name)?;

        for target in &targets {
            let found = self
                .objects
                .get(target)
                .ok_or(GraphError::ObjectNotFound(*target))?;
            if !model.is_kind_of(&found.entity, &rel.target) {
                return Err(GraphError::TargetMismatch {
                    relationship: rel.name.clone(),
                    expected: rel.target.clone(),
                    found: found.entity.clone(),
                });
            }
        }
        if !rel.is_to_many() && targets.len() > 1 {
            return Err(GraphError::CardinalityMismatch {
                entity: object.entity.clone(),
                relationship: rel.name.clone(),
            });
        }

        let old = object.relationship(name).map(|v| v.targets()).unwrap_or_default();
        let mut new = if append { old.clone() } else { Vec::new() };
        for target in targets {
            if !new.contains(&target) {
                new.push(target);
            }
        }
        if !rel.is_to_many() && new.len() > 1 {
            // Appending to a to-one slot replaces it.
            new.drain(..new.len() - 1);
        }

        let removed: Vec<ObjectId> = old.iter().filter(|t| !new.contains(t)).copied().collect();
        let added: Vec<ObjectId> = new.iter().filter(|t| !old.contains(t)).copied().collect();

        let value = match rel.cardinality {
            Cardinality::ToOne => RelationshipValue::ToOne(new.first().copied()),
            Cardinality::ToMany => RelationshipValue::ToMany(new),
        };
        if let Some(object) = self.objects.get_mut(&id) {
            object.relationships.insert(name.to_string(), value);
        }

        for target in removed {
            self.update_inverse(&model, rel, id, target, false);
        }
        for target in added {
            self.update_inverse(&model, rel, id, target, true);
        }
        Ok(())
    }

    /// Hard-remove an object: drops its identity binding, change flags and
    /// every reference to it.
    pub(crate) fn remove_object(&mut self, id: ObjectId) -> Option<ManagedObject> {
        let object = self.objects.remove(&id)?;
        self.identity.unbind_object(&id);
        self.inserted.remove(&id);
        self.updated.remove(&id);
        self.deleted.remove(&id);
        for other in self.objects.values_mut() {
            for value in other.relationships.values_mut() {
                match value {
                    RelationshipValue::ToOne(slot) if *slot == Some(id) => *slot = None,
                    RelationshipValue::ToMany(list) => list.retain(|t| *t != id),
                    _ => {}
                }
            }
        }
        Some(object)
    }

    /// Clear the pending flags of an object whose write succeeded.
    pub(crate) fn mark_saved(&mut self, id: ObjectId) {
        self.inserted.remove(&id);
        self.updated.remove(&id);
        if let Some(object) = self.objects.get_mut(&id) {
            object.changed.clear();
        }
    }

    /// Load synchronized objects (from a backing store or a parent context).
    ///
    /// Relationship targets that are not part of `objects` are dropped.
    pub(crate) fn restore(&mut self, objects: Vec<ManagedObject>) -> Result<(), GraphError> {
        for object in &objects {
            if let Some(rid) = &object.resource_id {
                let root = self.model.root_of(&object.entity).to_string();
                self.identity.bind(&root, rid, object.id)?;
            }
        }
        let ids: BTreeSet<ObjectId> = objects.iter().map(|o| o.id).collect();
        for mut object in objects {
            for value in object.relationships.values_mut() {
                match value {
                    RelationshipValue::ToOne(slot) => {
                        if slot.is_some_and(|t| !ids.contains(&t)) {
                            *slot = None;
                        }
                    }
                    RelationshipValue::ToMany(list) => list.retain(|t| ids.contains(t)),
                }
            }
            object.changed.clear();
            self.objects.insert(object.id, object);
        }
        Ok(())
    }

    /// Synchronized objects without pending changes, for seeding a child context.
    pub(crate) fn synchronized_objects(&self) -> Vec<ManagedObject> {
        self.objects()
            .filter(|o| {
                o.resource_id.is_some() && !self.inserted.contains(&o.id) && !self.updated.contains(&o.id)
            })
            .cloned()
            .collect()
    }

    // === Helpers ===

    fn live_object_mut(&mut self, id: ObjectId) -> Result<&mut ManagedObject, GraphError> {
        if self.deleted.contains(&id) {
            return Err(GraphError::ObjectNotFound(id));
        }
        self.objects.get_mut(&id).ok_or(GraphError::ObjectNotFound(id))
    }

    fn mark_updated(&mut self, id: ObjectId) {
        if !self.inserted.contains(&id) {
            self.updated.insert(id);
        }
    }

    fn expect_cardinality(
        &self,
        id: ObjectId,
        name: &str,
        cardinality: Cardinality,
    ) -> Result<(), GraphError> {
        if self.deleted.contains(&id) {
            return Err(GraphError::ObjectNotFound(id));
        }
        let object = self.objects.get(&id).ok_or(GraphError::ObjectNotFound(id))?;
        let rel = relationship_of(&self.model, &object.entity, name)?;
        if rel.cardinality != cardinality {
            return Err(GraphError::CardinalityMismatch {
                entity: object.entity.clone(),
                relationship: name.to_string(),
            });
        }
        Ok(())
    }

    fn expect_materialized(&self, id: ObjectId, name: &str) -> Result<(), GraphError> {
        match self.objects.get(&id) {
            Some(object) if object.is_relationship_materialized(name) => Ok(()),
            Some(_) => Err(GraphError::RelationshipFault {
                object: id,
                relationship: name.to_string(),
            }),
            None => Err(GraphError::ObjectNotFound(id)),
        }
    }

    /// Mirror a link change on the inverse side of `rel`.
    ///
    /// Unmaterialized to-many inverses are left as faults. Linking a to-one
    /// inverse that pointed elsewhere detaches the target from its previous
    /// owner.
    fn update_inverse(
        &mut self,
        model: &Model,
        rel: &RelationshipDescriptor,
        source: ObjectId,
        target: ObjectId,
        add: bool,
    ) {
        let Some(inverse_name) = rel.inverse.as_deref() else {
            return;
        };
        let Some(inverse) = self
            .objects
            .get(&target)
            .and_then(|t| model.entity(&t.entity))
            .and_then(|e| e.relationship(inverse_name))
        else {
            return;
        };
        let Some(target_object) = self.objects.get_mut(&target) else {
            return;
        };

        let mut displaced = None;
        match (inverse.cardinality, add) {
            (Cardinality::ToOne, true) => {
                if let Some(RelationshipValue::ToOne(Some(previous))) =
                    target_object.relationships.get(inverse_name)
                {
                    if *previous != source {
                        displaced = Some(*previous);
                    }
                }
                target_object
                    .relationships
                    .insert(inverse_name.to_string(), RelationshipValue::ToOne(Some(source)));
            }
            (Cardinality::ToOne, false) => {
                if let Some(RelationshipValue::ToOne(slot)) =
                    target_object.relationships.get_mut(inverse_name)
                {
                    if *slot == Some(source) {
                        *slot = None;
                    }
                }
            }
            (Cardinality::ToMany, true) => {
                if let Some(RelationshipValue::ToMany(list)) =
                    target_object.relationships.get_mut(inverse_name)
                {
                    if !list.contains(&source) {
                        list.push(source);
                    }
                }
            }
            (Cardinality::ToMany, false) => {
                if let Some(RelationshipValue::ToMany(list)) =
                    target_object.relationships.get_mut(inverse_name)
                {
                    list.retain(|t| *t != source);
                }
            }
        }

        if let Some(previous) = displaced {
            if let Some(previous_object) = self.objects.get_mut(&previous) {
                match previous_object.relationships.get_mut(&rel.name) {
                    Some(RelationshipValue::ToOne(slot)) if *slot == Some(target) => *slot = None,
                    Some(RelationshipValue::ToMany(list)) => list.retain(|t| *t != target),
                    _ => {}
                }
            }
        }
    }
}

fn relationship_of<'m>(
    model: &'m Model,
    entity: &str,
    name: &str,
) -> Result<&'m RelationshipDescriptor, GraphError> {
    model
        .entity(entity)
        .ok_or_else(|| GraphError::UnknownEntity(entity.to_string()))?
        .relationship(name)
        .ok_or_else(|| GraphError::UnknownRelationship {
            entity: entity.to_string(),
            relationship: name.to_string(),
        })
}
