//! Identity map: resource identifier <-> local object, one per context

use super::object::{ObjectId, ResourceId};
use std::collections::HashMap;
use thiserror::Error;

/// A binding that would break the identity bijection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityViolation {
    #[error("{entity}/{resource_id} is already bound to object {existing}")]
    AlreadyBound {
        entity: String,
        resource_id: ResourceId,
        existing: ObjectId,
    },

    #[error("object {object} already carries identifier {existing}")]
    Rebind {
        object: ObjectId,
        existing: ResourceId,
    },

    #[error("{resource_id} is bound to a {existing_entity}, not a {entity}")]
    IncompatibleEntity {
        entity: String,
        existing_entity: String,
        resource_id: ResourceId,
    },
}

type IdentityKey = (String, ResourceId);

/// Bijection between (root entity, resource identifier) and local objects.
///
/// Callers pass the root entity of an inheritance chain so that sub-entities
/// share one identifier space.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    forward: HashMap<IdentityKey, ObjectId>,
    reverse: HashMap<ObjectId, IdentityKey>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, entity: &str, id: &ResourceId) -> Option<ObjectId> {
        self.forward.get(&(entity.to_string(), id.clone())).copied()
    }

    /// Bind an identifier to an object.
    ///
    /// Re-binding the same pair is a no-op. On error the map is unchanged.
    pub fn bind(
        &mut self,
        entity: &str,
        id: &ResourceId,
        object: ObjectId,
    ) -> Result<(), IdentityViolation> {
        let key = (entity.to_string(), id.clone());
        if let Some(existing) = self.forward.get(&key) {
            if *existing == object {
                return Ok(());
            }
            return Err(IdentityViolation::AlreadyBound {
                entity: entity.to_string(),
                resource_id: id.clone(),
                existing: *existing,
            });
        }
        if let Some((_, existing)) = self.reverse.get(&object) {
            return Err(IdentityViolation::Rebind {
                object,
                existing: existing.clone(),
            });
        }
        self.forward.insert(key.clone(), object);
        self.reverse.insert(object, key);
        Ok(())
    }

    pub fn unbind(&mut self, entity: &str, id: &ResourceId) -> Option<ObjectId> {
        let object = self.forward.remove(&(entity.to_string(), id.clone()))?;
        self.reverse.remove(&object);
        Some(object)
    }

    /// Remove whatever binding the object holds.
    pub fn unbind_object(&mut self, object: &ObjectId) -> Option<ResourceId> {
        let (entity, id) = self.reverse.remove(object)?;
        self.forward.remove(&(entity, id.clone()));
        Some(id)
    }

    pub fn resource_id_of(&self, object: &ObjectId) -> Option<&ResourceId> {
        self.reverse.get(object).map(|(_, id)| id)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
