//! Save translator
//!
//! One wire request per pending insert, update and delete. Writes run
//! concurrently and are reconciled independently: a failed write stays
//! pending in the context and is reported in the summary's `SaveError`,
//! while the writes that succeeded are committed, persisted and propagated
//! to ancestor contexts.

use super::context::StoreContext;
use super::dispatch::{
    Completion, CompletionCallback, CompletionPayload, RequestKind, RequestToken, WriteKind, WriteOperation,
};
use super::engine::{IncrementalStore, StoreError, StoreResult};
use super::merge::{CacheMerger, MergeError, ObjectImage};
use crate::adapter::{CancellationToken, TransportError, WireRequest, WireResponse};
use crate::graph::{LocalGraph, ObjectId, ResourceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Snapshot of a context's pending changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveChangesRequest {
    pub inserted: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub deleted: Vec<ObjectId>,
}

impl SaveChangesRequest {
    /// Every pending change of a graph
    pub fn capture(graph: &LocalGraph) -> Self {
        Self {
            inserted: graph.inserted_objects().copied().collect(),
            updated: graph.updated_objects().copied().collect(),
            deleted: graph.deleted_objects().copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn operations(&self) -> Vec<WriteOperation> {
        let tagged = |ids: &[ObjectId], kind: WriteKind| {
            ids.iter()
                .map(move |&object| WriteOperation { object, kind })
                .collect::<Vec<_>>()
        };
        let mut operations = tagged(&self.inserted, WriteKind::Insert);
        operations.extend(tagged(&self.updated, WriteKind::Update));
        operations.extend(tagged(&self.deleted, WriteKind::Delete));
        operations
    }
}

/// One write that did not commit
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub object: ObjectId,
    pub kind: WriteKind,
    pub error: Arc<StoreError>,
}

/// Aggregate error of a save with failed writes
#[derive(Debug, Clone, Error)]
#[error("{} of {attempted} writes failed", failures.len())]
pub struct SaveError {
    pub attempted: usize,
    pub failures: Vec<WriteFailure>,
}

/// What a save committed
#[derive(Debug, Clone, Default)]
pub struct SaveSummary {
    pub inserted: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    /// Identifiers of the resources whose deletion succeeded
    pub deleted: Vec<ResourceId>,
    pub error: Option<SaveError>,
}

impl SaveSummary {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// A write whose wire request was built
struct PlannedWrite {
    operation: WriteOperation,
    request: WireRequest,
    /// Entity and identifier, for deletes
    target: Option<(String, ResourceId)>,
}

#[derive(Default)]
struct Commit {
    summary: SaveSummary,
    images: Vec<ObjectImage>,
    deleted: Vec<(String, ResourceId)>,
    removed: Vec<ObjectId>,
}

impl IncrementalStore {
    /// Start saving `request`. Returns the token of the network request, or
    /// `None` when the save was resolved without one (nothing to save, or a
    /// local-only commit); the callback has then already fired.
    pub fn start_save(
        &self,
        context: &Arc<StoreContext>,
        request: SaveChangesRequest,
        callback: Option<CompletionCallback>,
    ) -> StoreResult<Option<RequestToken>> {
        if request.is_empty() {
            if let Some(callback) = callback {
                callback(Completion::local(CompletionPayload::Saved(SaveSummary::default())));
            }
            return Ok(None);
        }

        if context.take_network_suppression() || !self.config().remote_saves {
            tracing::debug!(context = context.name(), "save committed locally");
            let summary = commit_locally(context, &request);
            if let Some(callback) = callback {
                callback(Completion::local(CompletionPayload::Saved(summary)));
            }
            return Ok(None);
        }

        let operations = request.operations();
        let attempted = operations.len();
        let (planned, failures) = self.plan_writes(context, &operations);

        let runtime = self.runtime()?;
        let (token, cancel) = context.dispatcher().begin(RequestKind::Save { operations }, callback);
        tracing::debug!(context = context.name(), %token, writes = planned.len(), "save dispatched");

        let store = self.clone();
        let owner = Arc::clone(context);
        let task = runtime.spawn(async move {
            let outcome = store
                .run_save(&owner, planned, failures, attempted, token, &cancel)
                .await
                .map(CompletionPayload::Saved)
                .map_err(Arc::new);
            owner.dispatcher().finish(token, outcome);
        });
        context.dispatcher().attach(token, task.abort_handle());
        Ok(Some(token))
    }

    /// Save every pending change of `context` and wait for the result.
    pub async fn save(&self, context: &Arc<StoreContext>) -> StoreResult<SaveSummary> {
        let request = context.read(SaveChangesRequest::capture);
        self.execute_save(context, request).await
    }

    pub async fn execute_save(
        &self,
        context: &Arc<StoreContext>,
        request: SaveChangesRequest,
    ) -> StoreResult<SaveSummary> {
        let (tx, rx) = oneshot::channel();
        self.start_save(
            context,
            request,
            Some(Box::new(move |completion: Completion| {
                let _ = tx.send(completion);
            })),
        )?;

        let completion = rx.await.map_err(|_| StoreError::ChannelClosed)?;
        match completion.outcome.map_err(Arc::unwrap_or_clone)? {
            CompletionPayload::Saved(summary) => Ok(summary),
            _ => Err(StoreError::TaskFailed("save resolved with a foreign payload".into())),
        }
    }

    /// Build one wire request per operation. Operations whose request cannot
    /// be built fail on their own.
    fn plan_writes(
        &self,
        context: &StoreContext,
        operations: &[WriteOperation],
    ) -> (Vec<PlannedWrite>, Vec<WriteFailure>) {
        let request_context = self.request_context(context);
        context.read(|graph| {
            let mut planned = Vec::new();
            let mut failures = Vec::new();
            for operation in operations {
                let Some(object) = graph.object(&operation.object) else {
                    failures.push(failure(*operation, StoreError::ObjectNotFound(operation.object)));
                    continue;
                };
                let built = match operation.kind {
                    WriteKind::Insert => self.adapter().insert_request(object, &request_context),
                    WriteKind::Update => self.adapter().update_request(object, &request_context),
                    WriteKind::Delete => self.adapter().delete_request(object, &request_context),
                };
                match built {
                    Ok(request) => planned.push(PlannedWrite {
                        operation: *operation,
                        request,
                        target: object
                            .resource_id
                            .clone()
                            .map(|rid| (object.entity.clone(), rid)),
                    }),
                    Err(error) => failures.push(failure(*operation, error.into())),
                }
            }
            (planned, failures)
        })
    }

    async fn run_save(
        &self,
        context: &Arc<StoreContext>,
        planned: Vec<PlannedWrite>,
        mut failures: Vec<WriteFailure>,
        attempted: usize,
        token: RequestToken,
        cancel: &CancellationToken,
    ) -> StoreResult<SaveSummary> {
        let in_flight: Vec<(PlannedWrite, JoinHandle<Result<WireResponse, TransportError>>)> = planned
            .into_iter()
            .map(|write| {
                let transport = self.shared_transport();
                let request = write.request.clone();
                let handle = tokio::spawn(async move { transport.execute(request).await });
                (write, handle)
            })
            .collect();

        let mut responses = Vec::with_capacity(in_flight.len());
        for (write, handle) in in_flight {
            let result = match handle.await {
                Ok(result) => result.map_err(StoreError::from),
                Err(join) => Err(StoreError::TaskFailed(join.to_string())),
            };
            responses.push((write, result));
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        context.claim_commit(token)?;

        let mut commit = context.perform(|graph| {
            let mut commit = Commit::default();
            for (write, result) in responses {
                let operation = write.operation;
                let response = match result {
                    Ok(response) => response,
                    Err(error) => {
                        failures.push(failure(operation, error));
                        continue;
                    }
                };
                match self.apply_write(graph, &write, &response) {
                    Ok(()) => commit.record(graph, &write),
                    Err(error) => failures.push(failure(operation, error)),
                }
            }
            commit.images = commit
                .summary
                .inserted
                .iter()
                .chain(commit.summary.updated.iter())
                .filter_map(|id| ObjectImage::capture(graph, *id))
                .collect();
            commit
        });

        let touched: Vec<ObjectId> = commit
            .summary
            .inserted
            .iter()
            .chain(commit.summary.updated.iter())
            .copied()
            .collect();
        self.persist(context, &touched, &commit.removed);
        self.propagate_commit(context, &commit.images, &commit.deleted);

        if !failures.is_empty() {
            tracing::warn!(
                context = context.name(),
                failed = failures.len(),
                attempted,
                "save partially failed"
            );
            commit.summary.error = Some(SaveError { attempted, failures });
        }
        Ok(commit.summary)
    }

    /// Reconcile one successful write response with the local graph.
    fn apply_write(
        &self,
        graph: &mut LocalGraph,
        write: &PlannedWrite,
        response: &WireResponse,
    ) -> Result<(), StoreError> {
        let id = write.operation.object;
        if write.operation.kind == WriteKind::Delete {
            graph.remove_object(id);
            return Ok(());
        }

        let entity = graph
            .object(&id)
            .map(|object| object.entity.clone())
            .ok_or(StoreError::ObjectNotFound(id))?;
        let descriptor = self
            .model()
            .entity(&entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.clone()))?;
        let echo = self
            .adapter()
            .representations(descriptor, response)?
            .into_vec()
            .into_iter()
            .next();

        match (echo, write.operation.kind) {
            (Some(representation), _) => {
                let mut merger = CacheMerger::new(self.adapter(), response, graph);
                let merged = merger.merge_into(id, &representation);
                merger.finish();
                merged?;
            }
            (None, WriteKind::Insert) => {
                return Err(MergeError::MissingIdentifier { entity }.into());
            }
            (None, _) => graph.mark_saved(id),
        }
        Ok(())
    }
}

impl Commit {
    fn record(&mut self, graph: &LocalGraph, write: &PlannedWrite) {
        let id = write.operation.object;
        match write.operation.kind {
            WriteKind::Insert => self.summary.inserted.push(id),
            WriteKind::Update => self.summary.updated.push(id),
            WriteKind::Delete => {
                self.removed.push(id);
                if let Some((entity, rid)) = &write.target {
                    self.summary.deleted.push(rid.clone());
                    self.deleted.push((entity.clone(), rid.clone()));
                }
            }
        }
        tracing::trace!(object = %id, kind = ?write.operation.kind, pending = graph.has_changes(), "write committed");
    }
}

fn failure(operation: WriteOperation, error: StoreError) -> WriteFailure {
    WriteFailure {
        object: operation.object,
        kind: operation.kind,
        error: Arc::new(error),
    }
}

/// Commit pending changes in the owning context only, without the network.
fn commit_locally(context: &StoreContext, request: &SaveChangesRequest) -> SaveSummary {
    context.perform(|graph| {
        let mut summary = SaveSummary::default();
        for id in &request.inserted {
            if graph.object(id).is_some() {
                graph.mark_saved(*id);
                summary.inserted.push(*id);
            }
        }
        for id in &request.updated {
            if graph.object(id).is_some() {
                graph.mark_saved(*id);
                summary.updated.push(*id);
            }
        }
        for id in &request.deleted {
            if let Some(object) = graph.remove_object(*id) {
                summary.deleted.extend(object.resource_id);
            }
        }
        summary
    })
}
