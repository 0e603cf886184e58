//! Predicates, sort descriptors and result structures

use crate::graph::{ManagedObject, Model, PropertyValue};
use std::cmp::Ordering;

/// Filter over object attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(String, PropertyValue),
    NotEquals(String, PropertyValue),
    In(String, Vec<PropertyValue>),
    /// True when the attribute is missing or null
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equals(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::Equals(key.into(), value.into())
    }

    pub fn evaluate(&self, object: &ManagedObject) -> bool {
        match self {
            Self::Equals(key, value) => object.attribute(key) == Some(value),
            Self::NotEquals(key, value) => object.attribute(key) != Some(value),
            Self::In(key, values) => object
                .attribute(key)
                .is_some_and(|v| values.contains(v)),
            Self::IsNull(key) => object.attribute(key).map_or(true, PropertyValue::is_null),
            Self::And(all) => all.iter().all(|p| p.evaluate(object)),
            Self::Or(any) => any.iter().any(|p| p.evaluate(object)),
            Self::Not(inner) => !inner.evaluate(object),
        }
    }

    /// Top-level equality terms, for adapters that turn them into query parameters.
    pub fn equalities(&self) -> Vec<(&str, &PropertyValue)> {
        match self {
            Self::Equals(key, value) => vec![(key.as_str(), value)],
            Self::And(all) => all.iter().flat_map(Predicate::equalities).collect(),
            _ => Vec::new(),
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }

    pub(crate) fn compare(&self, a: &ManagedObject, b: &ManagedObject) -> Ordering {
        let null = PropertyValue::Null;
        let left = a.attribute(&self.key).unwrap_or(&null);
        let right = b.attribute(&self.key).unwrap_or(&null);
        let ordering = left.compare(right).unwrap_or(Ordering::Equal);
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Result of a fetch request against a local graph
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Objects matching the request, after offset and limit
    pub objects: Vec<ManagedObject>,
    /// Total count (may differ from objects.len() if limit applied)
    pub total_count: usize,
}

impl FetchResult {
    pub fn empty() -> Self {
        Self {
            objects: Vec::new(),
            total_count: 0,
        }
    }

    pub fn ids(&self) -> Vec<crate::graph::ObjectId> {
        self.objects.iter().map(|o| o.id).collect()
    }
}

pub(crate) fn entity_matches(model: &Model, candidate: &str, entity: &str, include_subentities: bool) -> bool {
    if include_subentities {
        model.is_kind_of(candidate, entity)
    } else {
        candidate == entity
    }
}
