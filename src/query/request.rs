//! Fetch requests: the caller-owned read descriptor

use super::types::{entity_matches, FetchResult, Predicate, SortDescriptor};
use crate::graph::{LocalGraph, ManagedObject};

/// Read request against one entity
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Entity to fetch
    pub entity: String,
    /// Attribute filter
    pub predicate: Option<Predicate>,
    /// Sort keys, most significant first
    pub sort: Vec<SortDescriptor>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Number of results to skip
    pub offset: Option<usize>,
    /// Also match objects of sub-entities
    pub include_subentities: bool,
}

impl FetchRequest {
    /// Create a request matching every object of an entity
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Vec::new(),
            limit: None,
            offset: None,
            include_subentities: true,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn sorted_by(mut self, sort: SortDescriptor) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip results (for pagination)
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn exact_entity(mut self) -> Self {
        self.include_subentities = false;
        self
    }

    /// Execute the request against a local graph
    pub fn execute(&self, graph: &LocalGraph) -> FetchResult {
        let mut objects: Vec<ManagedObject> = graph
            .objects()
            .filter(|object| self.matches(graph, object))
            .cloned()
            .collect();

        // Stable base order so unsorted results do not depend on hashing.
        objects.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if !self.sort.is_empty() {
            objects.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|s| s.compare(a, b))
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let total_count = objects.len();

        if let Some(offset) = self.offset {
            if offset < objects.len() {
                objects.drain(..offset);
            } else {
                objects.clear();
            }
        }

        if let Some(limit) = self.limit {
            objects.truncate(limit);
        }

        FetchResult {
            objects,
            total_count,
        }
    }

    fn matches(&self, graph: &LocalGraph, object: &ManagedObject) -> bool {
        if !entity_matches(graph.model(), &object.entity, &self.entity, self.include_subentities) {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate.evaluate(object),
            None => true,
        }
    }
}
