//! ResourceAdapter trait: the contract between the store and a remote API
//!
//! An adapter builds wire requests for fetches, faults and saves, and
//! decodes responses into representations. It never touches the local
//! graph; the store merges what it decodes.

use super::types::{Method, Representation, Representations, RequestContext, RequestTarget, WireRequest, WireResponse};
use crate::graph::{EntityDescriptor, ManagedObject, Properties, RelationshipDescriptor, ResourceId};
use crate::query::FetchRequest;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while building requests or decoding responses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The adapter does not implement an optional request family
    #[error("adapter does not implement {0}")]
    Unimplemented(&'static str),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("cannot build request: {0}")]
    Request(String),
}

/// Optional request families an adapter implements
///
/// Checked once when the store is configured, so a missing capability
/// surfaces at setup instead of mid-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterCapabilities {
    /// insert/update/delete requests
    pub writes: bool,
    /// object requests for attribute faults
    pub attribute_faults: bool,
    /// relationship requests for relationship faults
    pub relationship_faults: bool,
}

impl AdapterCapabilities {
    pub fn all() -> Self {
        Self {
            writes: true,
            attribute_faults: true,
            relationship_faults: true,
        }
    }

    pub fn read_only() -> Self {
        Self::default()
    }
}

/// The contract adapters implement.
///
/// Decoding methods are required. Request builders for writes and faults
/// default to `AdapterError::Unimplemented` and must be declared through
/// `capabilities()` when overridden.
pub trait ResourceAdapter: Send + Sync {
    fn capabilities(&self) -> AdapterCapabilities;

    /// Decode the top-level representations of a response
    fn representations(
        &self,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> Result<Representations, AdapterError>;

    /// Nested relationship representations embedded in one representation.
    ///
    /// Relationships absent from the map are left untouched by the merge.
    fn relationship_representations(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> BTreeMap<String, Representations>;

    fn resource_identifier(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> Option<ResourceId>;

    /// Scalar attributes of one representation, keyed by schema attribute name
    fn attributes(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> Properties;

    fn fetch_request(
        &self,
        request: &FetchRequest,
        context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError>;

    /// Request for one object or one of its relationships, used by faults
    fn object_request(
        &self,
        _method: Method,
        _target: RequestTarget<'_>,
        _context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        Err(AdapterError::Unimplemented("object requests"))
    }

    /// Body sent for inserts and updates
    fn representation_of_attributes(
        &self,
        object: &ManagedObject,
        _entity: &EntityDescriptor,
    ) -> Representation {
        object
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    fn insert_request(
        &self,
        _object: &ManagedObject,
        _context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        Err(AdapterError::Unimplemented("insert requests"))
    }

    fn update_request(
        &self,
        _object: &ManagedObject,
        _context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        Err(AdapterError::Unimplemented("update requests"))
    }

    fn delete_request(
        &self,
        _object: &ManagedObject,
        _context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        Err(AdapterError::Unimplemented("delete requests"))
    }

    /// Whether a fetch should go to the network at all
    fn requires_network(&self, _request: &FetchRequest) -> bool {
        true
    }

    fn should_fetch_attributes(&self, _object: &ManagedObject) -> bool {
        true
    }

    fn should_fetch_relationship(
        &self,
        _object: &ManagedObject,
        _relationship: &RelationshipDescriptor,
    ) -> bool {
        true
    }

    /// Merge to-many relationship payloads by appending instead of replacing
    fn appends_to_many(&self, _relationship: &RelationshipDescriptor) -> bool {
        false
    }
}
