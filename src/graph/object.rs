//! Managed objects: the local mirror of one remote resource

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Opaque handle to an object in a local graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Create a new random ObjectId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an ObjectId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable external key of a remote resource within its entity type
///
/// Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Typed attribute values
///
/// Untagged: RFC 3339 strings deserialize as `Date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(DateTime<Utc>),
    String(String),
    Array(Vec<PropertyValue>),
    Object(HashMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Ordering used by sort descriptors.
    ///
    /// Numbers compare across Int/Float; Null sorts first; values of
    /// unrelated kinds are unordered.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Int(b)) => a.partial_cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Render as a JSON value for wire bodies.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Date(d) => Value::String(d.to_rfc3339()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Attribute collection
pub type Properties = HashMap<String, PropertyValue>;

/// Materialized value of one relationship slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "targets", rename_all = "kebab-case")]
pub enum RelationshipValue {
    ToOne(Option<ObjectId>),
    ToMany(Vec<ObjectId>),
}

impl RelationshipValue {
    /// The related objects, in order.
    pub fn targets(&self) -> Vec<ObjectId> {
        match self {
            Self::ToOne(target) => target.iter().copied().collect(),
            Self::ToMany(targets) => targets.clone(),
        }
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        match self {
            Self::ToOne(target) => target.as_ref() == Some(id),
            Self::ToMany(targets) => targets.contains(id),
        }
    }
}

/// Object metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// When the object was created locally
    pub created_at: Option<DateTime<Utc>>,
    /// When a remote representation was last merged into the object
    pub merged_at: Option<DateTime<Utc>>,
}

/// An object in the local graph
///
/// A relationship name missing from `relationships` is a fault: the slot
/// exists in the schema but its membership has not been loaded yet.
/// Likewise `attributes_materialized == false` marks an attribute fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedObject {
    /// Local handle
    pub id: ObjectId,
    /// Concrete entity name
    pub entity: String,
    /// Remote identifier, once known
    pub resource_id: Option<ResourceId>,
    /// Scalar attributes
    pub attributes: Properties,
    /// Whether the attribute set has been loaded
    pub attributes_materialized: bool,
    /// Loaded relationship slots
    pub relationships: HashMap<String, RelationshipValue>,
    /// Attributes edited locally since the last successful save
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub changed: BTreeSet<String>,
    /// Object metadata
    pub metadata: ObjectMetadata,
}

impl ManagedObject {
    /// Create an empty, unmaterialized object of the given entity
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            entity: entity.into(),
            resource_id: None,
            attributes: HashMap::new(),
            attributes_materialized: false,
            relationships: HashMap::new(),
            changed: BTreeSet::new(),
            metadata: ObjectMetadata {
                created_at: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    /// Set an attribute (builder form, no change tracking)
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<ResourceId>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&PropertyValue> {
        self.attributes.get(key)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipValue> {
        self.relationships.get(name)
    }

    pub fn is_relationship_materialized(&self, name: &str) -> bool {
        self.relationships.contains_key(name)
    }

    /// Attributes edited locally and not yet saved
    pub fn has_pending_edits(&self) -> bool {
        !self.changed.is_empty()
    }

    /// True once the object is known to the server.
    pub fn is_synchronized(&self) -> bool {
        self.resource_id.is_some()
    }
}
