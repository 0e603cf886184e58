//! Fetch translator
//!
//! A fetch first answers from the local graph. Unless the network is
//! suppressed for the context (or the adapter says the request needs no
//! network), the adapter builds a wire request, the transport executes it
//! on the runtime, and the decoded representations are merged into the
//! context and its ancestors. The completion carries the re-run local
//! result.

use super::context::StoreContext;
use super::dispatch::{Completion, CompletionCallback, CompletionPayload, RequestKind, RequestToken};
use super::engine::{IncrementalStore, StoreError, StoreResult};
use super::merge::MergeReport;
use crate::adapter::{CancellationToken, WireRequest};
use crate::query::{FetchRequest, FetchResult};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Returned by `start_fetch`
#[derive(Debug, Clone)]
pub struct StartedFetch {
    /// The local answer at the time of the call
    pub result: FetchResult,
    /// Token of the network request, if one was dispatched
    pub token: Option<RequestToken>,
}

/// Resolved fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub result: FetchResult,
    pub report: MergeReport,
    pub from_network: bool,
}

impl IncrementalStore {
    /// Start a fetch. The local result is returned at once; if a network
    /// request is dispatched the callback fires when it resolves, otherwise
    /// it fires before this returns.
    pub fn start_fetch(
        &self,
        context: &Arc<StoreContext>,
        request: FetchRequest,
        callback: Option<CompletionCallback>,
    ) -> StoreResult<StartedFetch> {
        if self.model().entity(&request.entity).is_none() {
            return Err(StoreError::UnknownEntity(request.entity));
        }
        let local = context.execute(&request);

        if context.take_network_suppression() || !self.adapter().requires_network(&request) {
            tracing::debug!(context = context.name(), entity = %request.entity, "fetch served locally");
            if let Some(callback) = callback {
                callback(Completion::local(CompletionPayload::Fetched {
                    objects: local.ids(),
                    report: MergeReport::default(),
                }));
            }
            return Ok(StartedFetch {
                result: local,
                token: None,
            });
        }

        let wire = self
            .adapter()
            .fetch_request(&request, &self.request_context(context))?;
        let runtime = self.runtime()?;
        let (token, cancel) = context.dispatcher().begin(
            RequestKind::Fetch {
                entity: request.entity.clone(),
            },
            callback,
        );

        let store = self.clone();
        let owner = Arc::clone(context);
        let task = runtime.spawn(async move {
            let outcome = store
                .run_fetch(&owner, &request, wire, token, &cancel)
                .await
                .map_err(Arc::new);
            owner.dispatcher().finish(token, outcome);
        });
        context.dispatcher().attach(token, task.abort_handle());

        Ok(StartedFetch {
            result: local,
            token: Some(token),
        })
    }

    /// Fetch and wait for the result.
    pub async fn fetch(&self, context: &Arc<StoreContext>, request: FetchRequest) -> StoreResult<FetchOutcome> {
        let (tx, rx) = oneshot::channel();
        let retained = request.clone();
        let started = self.start_fetch(
            context,
            request,
            Some(Box::new(move |completion| {
                let _ = tx.send(completion);
            })),
        )?;

        let completion = rx.await.map_err(|_| StoreError::ChannelClosed)?;
        match completion.outcome.map_err(Arc::unwrap_or_clone)? {
            CompletionPayload::Fetched { report, .. } => Ok(FetchOutcome {
                result: context.execute(&retained),
                report,
                from_network: started.token.is_some(),
            }),
            _ => Err(StoreError::TaskFailed("fetch resolved with a foreign payload".into())),
        }
    }

    async fn run_fetch(
        &self,
        context: &Arc<StoreContext>,
        request: &FetchRequest,
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
            .entity(&request.entity)
            .ok_or_else(|| StoreError::UnknownEntity(request.entity.clone()))?;
        let representations = self.adapter().representations(descriptor, &response)?;
        tracing::debug!(
            context = context.name(),
            entity = %request.entity,
            count = representations.len(),
            "merging fetch response"
        );

        context.claim_commit(token)?;

        let (_, report) = self.merge_lineage(context, &response, |merger| {
            merger.merge_all(&request.entity, representations.clone())
        });
        let objects = context.execute(request).ids();
        Ok(CompletionPayload::Fetched { objects, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{RestAdapter, TransportError, WireResponse};
    use crate::config::StoreConfig;
    use crate::graph::{AttributeType, EntityDescriptor, Model, PropertyValue};
    use crate::query::Predicate;
    use crate::store::testing::ScriptedTransport;
    use serde_json::json;

    fn store(transport: Arc<ScriptedTransport>) -> IncrementalStore {
        let model = Model::new(vec![EntityDescriptor::new("Post").with_attribute("title", AttributeType::String)])
            .unwrap();
        IncrementalStore::new(model, Arc::new(RestAdapter::new()), transport, StoreConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn network_fetch_merges_and_requeries() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(WireResponse::ok(json!([
            {"id": "1", "title": "A"},
            {"id": "2", "title": "B"}
        ])));
        let store = store(Arc::clone(&transport));
        let context = store.root_context().unwrap();

        let outcome = store.fetch(&context, FetchRequest::new("Post")).await.unwrap();
        assert!(outcome.from_network);
        assert_eq!(outcome.result.total_count, 2);
        assert_eq!(outcome.report.created.len(), 2);
        assert_eq!(transport.requests()[0].path, "/posts");

        let filtered = context.execute(&FetchRequest::new("Post").with_predicate(Predicate::equals("title", "B")));
        assert_eq!(filtered.objects[0].attribute("title"), Some(&PropertyValue::from("B")));
    }

    #[tokio::test]
    async fn suppressed_fetch_never_touches_transport() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store(Arc::clone(&transport));
        let context = store.root_context().unwrap();
        context.set_network_suppressed(true);

        let outcome = store.fetch(&context, FetchRequest::new("Post")).await.unwrap();
        assert!(!outcome.from_network);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_reaches_the_caller() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(TransportError::Connection("refused".into()));
        let store = store(Arc::clone(&transport));
        let context = store.root_context().unwrap();

        let err = store.fetch(&context, FetchRequest::new("Post")).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(TransportError::Connection(_))));
        assert_eq!(context.in_flight(), 0);
    }

    #[tokio::test]
    async fn unknown_entity_is_rejected_up_front() {
        let store = store(Arc::new(ScriptedTransport::new()));
        let context = store.root_context().unwrap();
        let err = store.start_fetch(&context, FetchRequest::new("Nope"), None).unwrap_err();
        assert!(matches!(err, StoreError::UnknownEntity(_)));
    }
}
