//! Shared helpers for store integration tests
//!
//! In-memory transports standing in for a REST server, and an adapter
//! wrapper that counts how often the store consults it.

#![allow(dead_code)]

use async_trait::async_trait;
use mirrorgraph::adapter::{RequestContext, RequestTarget};
use mirrorgraph::graph::{EntityDescriptor, Properties, RelationshipDescriptor};
use mirrorgraph::{
    AdapterCapabilities, AdapterError, FetchRequest, ManagedObject, Method, Model, Representation,
    Representations, ResourceAdapter, ResourceId, RestAdapter, Transport, TransportError, WireRequest,
    WireResponse,
};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// The blog model used across scenarios
pub fn blog_model() -> Model {
    Model::from_yaml(
        r#"
entities:
  Post:
    attributes:
      title: string
      views: integer
    relationships:
      comments: { target: Comment, cardinality: to-many, inverse: post }
      author: { target: User }
  Comment:
    attributes:
      body: string
    relationships:
      post: { target: Post, inverse: comments }
  User:
    attributes:
      name: string
"#,
    )
    .expect("blog model is valid")
}

pub fn rep(value: Value) -> Representation {
    value.as_object().cloned().expect("representation is an object")
}

/// Answers requests from a queue in order and records every request.
///
/// When gated, each request waits for a permit on the gate before answering.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<WireResponse, TransportError>>>,
    requests: Mutex<Vec<WireRequest>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let transport = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (transport, gate)
    }

    pub fn respond(&self, body: Value) {
        self.responses.lock().unwrap().push_back(Ok(WireResponse::ok(body)));
    }

    pub fn fail(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(TransportError::Status {
                status: 404,
                message: "no scripted response".into(),
            })
        })
    }
}

/// Answers each request with a function of the request
pub struct FnTransport<F> {
    handler: F,
    calls: AtomicUsize,
}

impl<F> FnTransport<F>
where
    F: Fn(&WireRequest) -> Result<WireResponse, TransportError> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> Transport for FnTransport<F>
where
    F: Fn(&WireRequest) -> Result<WireResponse, TransportError> + Send + Sync,
{
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(&request)
    }
}

/// RestAdapter wrapper counting every call the store makes into it.
///
/// With a decode delay, `representations` blocks its thread first, the way
/// a slow synchronous decoder would.
pub struct CountingAdapter {
    inner: RestAdapter,
    calls: AtomicUsize,
    decode_delay: Option<Duration>,
}

impl CountingAdapter {
    pub fn new() -> Self {
        Self {
            inner: RestAdapter::new(),
            calls: AtomicUsize::new(0),
            decode_delay: None,
        }
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ResourceAdapter for CountingAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        self.inner.capabilities()
    }

    fn representations(
        &self,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> Result<Representations, AdapterError> {
        self.tick();
        if let Some(delay) = self.decode_delay {
            std::thread::sleep(delay);
        }
        self.inner.representations(entity, response)
    }

    fn relationship_representations(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> BTreeMap<String, Representations> {
        self.tick();
        self.inner.relationship_representations(representation, entity, response)
    }

    fn resource_identifier(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> Option<ResourceId> {
        self.tick();
        self.inner.resource_identifier(representation, entity, response)
    }

    fn attributes(
        &self,
        representation: &Representation,
        entity: &EntityDescriptor,
        response: &WireResponse,
    ) -> Properties {
        self.tick();
        self.inner.attributes(representation, entity, response)
    }

    fn fetch_request(
        &self,
        request: &FetchRequest,
        context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        self.tick();
        self.inner.fetch_request(request, context)
    }

    fn object_request(
        &self,
        method: Method,
        target: RequestTarget<'_>,
        context: &RequestContext<'_>,
    ) -> Result<WireRequest, AdapterError> {
        self.tick();
        self.inner.object_request(method, target, context)
    }

    fn insert_request(&self, object: &ManagedObject, context: &RequestContext<'_>) -> Result<WireRequest, AdapterError> {
        self.tick();
        self.inner.insert_request(object, context)
    }

    fn update_request(&self, object: &ManagedObject, context: &RequestContext<'_>) -> Result<WireRequest, AdapterError> {
        self.tick();
        self.inner.update_request(object, context)
    }

    fn delete_request(&self, object: &ManagedObject, context: &RequestContext<'_>) -> Result<WireRequest, AdapterError> {
        self.tick();
        self.inner.delete_request(object, context)
    }

    fn requires_network(&self, request: &FetchRequest) -> bool {
        self.tick();
        self.inner.requires_network(request)
    }

    fn should_fetch_attributes(&self, object: &ManagedObject) -> bool {
        self.tick();
        self.inner.should_fetch_attributes(object)
    }

    fn should_fetch_relationship(&self, object: &ManagedObject, relationship: &RelationshipDescriptor) -> bool {
        self.tick();
        self.inner.should_fetch_relationship(object, relationship)
    }
}
