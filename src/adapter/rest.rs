//! RestAdapter: a ResourceAdapter following common REST conventions
//!
//! - collection path: `/{plural of lower-cased entity}`
//! - object path: `/{collection}/{resource id}`
//! - relationship path: `/{object path}/{plural target}` for to-many,
//!   `/{object path}/{target}` for to-one
//!
//! Responses may wrap their payload under the entity's plural or singular
//! key. Relationship values may be nested objects, arrays, or bare
//! identifiers; bare identifiers become references to faulted objects.

use super::paginator::Paginator;
use super::traits::{AdapterCapabilities, AdapterError, ResourceAdapter};
use super::types::{Method, Representation, Representations, RequestContext, RequestTarget, WireRequest, WireResponse};
use crate::graph::{AttributeType, EntityDescriptor, ManagedObject, Properties, PropertyValue, RelationshipDescriptor, ResourceId};
use crate::query::FetchRequest;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const IDENTIFIER_KEYS: [&str; 5] = ["id", "_id", "identifier", "url", "URL"];

/// REST conventions adapter
#[derive(Clone)]
pub struct RestAdapter {
    paginator: Option<Arc<dyn Paginator>>,
    identifier_keys: Vec<String>,
}

impl RestAdapter {
    pub fn new() -> Self {
        Self {
            paginator: None,
            identifier_keys: IDENTIFIER_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_paginator(mut self, paginator: impl Paginator + 'static) -> Self {
        self.paginator = Some(Arc::new(paginator));
        self
    }

    /// Replace the keys searched for a resource identifier, in priority order
    pub fn with_identifier_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifier_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn path_for_entity(&self, entity: &str) -> String {
        format!("/{}", pluralize(&entity.to_lowercase()))
    }

    pub fn path_for_object(&self, object: &ManagedObject) -> Result<String, AdapterError> {
        let id = object.resource_id.as_ref().ok_or_else(|| {
            AdapterError::Request(format!("{} {} has no resource identifier", object.entity, object.id))
        })?;
        Ok(format!("{}/{}", self.path_for_entity(&object.entity), id))
    }

    pub fn path_for_relationship(
        &self,
        relationship: &RelationshipDescriptor,
        object: &ManagedObject,
    ) -> Result<String, AdapterError> {
        let target = relationship.target.to_lowercase();
        let segment = if relationship.is_to_many() {
            pluralize(&target)
        } else {
            target
        };
        Ok(format!("{}/{}", self.path_for_object(object)?, segment))
    }

    /// Strip a `{ "posts": [...] }` or `{ "post": {...} }` envelope.
    fn unwrap_body<'a>(&self, entity: &str, body: &'a Value) -> &'a Value {
        let singular = entity.to_lowercase();
        let plural = pluralize(&singular);
        match body {
            Value::Object(map) => map
                .get(&plural)
                .or_else(|| map.get(&singular))
                .unwrap_or(body),
            _ => body,
        }
    }

    /// A bare identifier becomes a representation holding only that identifier.
    fn reference(&self, value: &Value) -> Option<Representation> {
        let key = self.identifier_keys.first()?.clone();
        match value {
            Value::String(_) | Value::Number(_) => {
                let mut rep = Representation::new();
                rep.insert(key, value.clone());
                Some(rep)
            }
            _ => None,
        }
    }

    fn entity_of<'m>(
        &self,
        object: &ManagedObject,
        context: &RequestContext<'m>,
    ) -> Result<&'m EntityDescriptor, AdapterError> {
        context
            .model
            .entity(&object.entity)
            .ok_or_else(|| AdapterError::Request(format!("unknown entity {}", object.entity)))
    }
}

impl Default for RestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RestAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAdapter")
            .field("paginated", &self.paginator.is_some())
            .field("identifier_keys", &self.identifier_keys)
            .finish()
    }
}

impl ResourceAdapter for RestAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::all()
    }

    fn representations(
        &self,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> Result<Representations, AdapterError> {
        match self.unwrap_body(&entity.name, &response.body) {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map.clone()),
                    other => Err(AdapterError::MalformedResponse(format!(
                        "expected an object in {} collection, got {}",
                        entity.name, other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Representations::Many),
            Value::Object(map) => Ok(Representations::One(map.clone())),
            Value::Null => Ok(Representations::none()),
            other => Err(AdapterError::MalformedResponse(format!(
                "expected an object or array for {}, got {}",
                entity.name, other
            ))),
        }
    }

    fn relationship_representations(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        _response: &WireResponse,
    ) -> BTreeMap<String, Representations> {
        let mut nested = BTreeMap::new();
        for (name, relationship) in &entity.relationships {
            let reps = match representation.get(name) {
                None => continue,
                Some(Value::Null) => Representations::none(),
                Some(Value::Object(map)) => Representations::One(map.clone()),
                Some(Value::Array(items)) => Representations::Many(
                    items
                        .iter()
                        .filter_map(|item| match item {
                            Value::Object(map) => Some(map.clone()),
                            other => self.reference(other),
                        })
                        .collect(),
                ),
                Some(other) => match self.reference(other) {
                    Some(rep) if relationship.is_to_many() => Representations::Many(vec![rep]),
                    Some(rep) => Representations::One(rep),
                    None => continue,
                },
            };
            nested.insert(name.clone(), reps);
        }
        nested
    }

    fn resource_identifier(
        &self,
        representation: &Representation,
        _entity: &EntityDescriptor,
        _response: &WireResponse,
    ) -> Option<ResourceId> {
        self.identifier_keys
            .iter()
            .find_map(|key| match representation.get(key) {
                Some(Value::String(s)) if !s.is_empty() => Some(ResourceId::from(s.as_str())),
                Some(Value::Number(n)) => Some(ResourceId::from(n.to_string())),
                _ => None,
            })
    }

    fn attributes(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        _response: &WireResponse,
    ) -> Properties {
        entity
            .attributes
            .iter()
            .filter_map(|(name, kind)| {
                representation
                    .get(name)
                    .map(|value| (name.clone(), coerce(*kind, value)))
            })
            .collect()
    }

    fn fetch_request(
        &self,
        request: &FetchRequest,
        _context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        let mut wire = WireRequest::get(self.path_for_entity(&request.entity));
        if let Some(predicate) = &request.predicate {
            for (key, value) in predicate.equalities() {
                wire = wire.with_query(key, query_value(value));
            }
        }
        if let Some(paginator) = &self.paginator {
            for (key, value) in paginator.parameters(request) {
                wire = wire.with_query(key, value);
            }
        }
        Ok(wire)
    }

    fn object_request(
        &self,
        method: Method,
        target: RequestTarget<'_>,
        _context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        let path = match target {
            RequestTarget::Object(object) => self.path_for_object(object)?,
            RequestTarget::Relationship {
                object,
                relationship,
            } => self.path_for_relationship(relationship, object)?,
        };
        Ok(WireRequest::new(method, path))
    }

    fn insert_request(
        &self,
        object: &ManagedObject,
        context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        let entity = self.entity_of(object, context)?;
        let body = self.representation_of_attributes(object, entity);
        Ok(WireRequest::new(Method::Post, self.path_for_entity(&object.entity))
            .with_body(Value::Object(body)))
    }

    fn update_request(
        &self,
        object: &ManagedObject,
        context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        let entity = self.entity_of(object, context)?;
        let body = self.representation_of_attributes(object, entity);
        Ok(WireRequest::new(Method::Put, self.path_for_object(object)?)
            .with_body(Value::Object(body)))
    }

    fn delete_request(
        &self,
        object: &ManagedObject,
        _context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        Ok(WireRequest::new(Method::Delete, self.path_for_object(object)?))
    }
}

/// Imprecise English pluralization of a lower-case word
pub fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) && !stem.is_empty() {
            return format!("{stem}ies");
        }
    }
    if word.ends_with(['s', 'x', 'z']) || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }
    format!("{word}s")
}

fn query_value(value: &PropertyValue) -> String {
    match value.to_json() {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Convert a JSON value to the attribute's schema type where possible.
fn coerce(kind: AttributeType, value: &Value) -> PropertyValue {
    match (kind, value) {
        (_, Value::Null) => PropertyValue::Null,
        (AttributeType::Date, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|d| PropertyValue::Date(d.with_timezone(&Utc)))
            .unwrap_or_else(|_| PropertyValue::String(s.clone())),
        (AttributeType::Date, Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(PropertyValue::Date)
            .unwrap_or_else(|| PropertyValue::from(value.clone())),
        (AttributeType::Integer, Value::String(s)) => s
            .parse::<i64>()
            .map(PropertyValue::Int)
            .unwrap_or_else(|_| PropertyValue::String(s.clone())),
        (AttributeType::Integer, Value::Number(n)) => match n.as_i64() {
            Some(i) => PropertyValue::Int(i),
            None => PropertyValue::Int(n.as_f64().unwrap_or_default() as i64),
        },
        (AttributeType::Float, Value::Number(n)) => PropertyValue::Float(n.as_f64().unwrap_or_default()),
        (AttributeType::Float, Value::String(s)) => s
            .parse::<f64>()
            .map(PropertyValue::Float)
            .unwrap_or_else(|_| PropertyValue::String(s.clone())),
        (AttributeType::Boolean, Value::String(s)) => match s.as_str() {
            "true" | "1" => PropertyValue::Bool(true),
            "false" | "0" => PropertyValue::Bool(false),
            _ => PropertyValue::String(s.clone()),
        },
        (AttributeType::Boolean, Value::Number(n)) => PropertyValue::Bool(n.as_i64() != Some(0)),
        (AttributeType::String, Value::Number(n)) => PropertyValue::String(n.to_string()),
        (AttributeType::String, Value::Bool(b)) => PropertyValue::String(b.to_string()),
        (_, other) => PropertyValue::from(other.clone()),
    }
}
