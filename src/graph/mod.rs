//! Local object graph: schema, objects, identity, change tracking

mod identity;
mod local;
mod object;
mod schema;

pub use identity::{IdentityMap, IdentityViolation};
pub use local::{GraphError, LocalGraph};
pub use object::{
    ManagedObject, ObjectId, ObjectMetadata, Properties, PropertyValue, RelationshipValue,
    ResourceId,
};
pub use schema::{
    AttributeType, Cardinality, EntityDescriptor, Model, RelationshipDescriptor, SchemaError,
};
