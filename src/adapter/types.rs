//! Wire-level request/response types and decoded representations

use crate::graph::{ManagedObject, Model, RelationshipDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decoded external form of one resource
pub type Representation = serde_json::Map<String, Value>;

/// Decoded response body: one resource or an ordered collection
#[derive(Debug, Clone, PartialEq)]
pub enum Representations {
    One(Representation),
    Many(Vec<Representation>),
}

impl Representations {
    /// An empty collection. Merged into a to-one slot, it clears the slot.
    pub fn none() -> Self {
        Self::Many(Vec::new())
    }

    pub fn into_vec(self) -> Vec<Representation> {
        match self {
            Self::One(rep) => vec![rep],
            Self::Many(reps) => reps,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(reps) => reps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HTTP method of a wire request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request ready for a transport
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    /// Path relative to the transport's base URL
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl WireRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A transport's answer to a wire request
#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    /// Decoded JSON body; `Null` for empty bodies
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

impl WireResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            headers: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What an object-scoped request is about
#[derive(Debug, Clone, Copy)]
pub enum RequestTarget<'a> {
    /// The object's own resource
    Object(&'a ManagedObject),
    /// One relationship of the object
    Relationship {
        object: &'a ManagedObject,
        relationship: &'a RelationshipDescriptor,
    },
}

impl<'a> RequestTarget<'a> {
    pub fn object(&self) -> &'a ManagedObject {
        match self {
            Self::Object(object) => object,
            Self::Relationship { object, .. } => object,
        }
    }
}

/// Ambient information available while building requests
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Name of the context issuing the request
    pub context_name: &'a str,
    pub model: &'a Model,
}
