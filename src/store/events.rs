//! Lifecycle events broadcast on a context's event channel
//!
//! Every network-backed request emits one `Will*` event when it is
//! dispatched and one `Did*` event when it resolves, carrying the same
//! outcome its completion callback receives.

use super::dispatch::{Outcome, RequestKind, RequestToken, WriteOperation};
use crate::graph::ObjectId;

/// A request lifecycle event
#[derive(Debug, Clone)]
pub enum StoreEvent {
    WillFetch {
        token: RequestToken,
        entity: String,
    },
    DidFetch {
        token: RequestToken,
        entity: String,
        outcome: Outcome,
    },
    WillSave {
        token: RequestToken,
        operations: Vec<WriteOperation>,
    },
    DidSave {
        token: RequestToken,
        operations: Vec<WriteOperation>,
        outcome: Outcome,
    },
    WillFaultAttributes {
        token: RequestToken,
        object: ObjectId,
    },
    DidFaultAttributes {
        token: RequestToken,
        object: ObjectId,
        outcome: Outcome,
    },
    WillFaultRelationship {
        token: RequestToken,
        object: ObjectId,
        relationship: String,
    },
    DidFaultRelationship {
        token: RequestToken,
        object: ObjectId,
        relationship: String,
        outcome: Outcome,
    },
}

impl StoreEvent {
    pub(crate) fn will(token: RequestToken, kind: &RequestKind) -> Self {
        match kind.clone() {
            RequestKind::Fetch { entity } => Self::WillFetch { token, entity },
            RequestKind::Save { operations } => Self::WillSave { token, operations },
            RequestKind::AttributeFault { object } => Self::WillFaultAttributes { token, object },
            RequestKind::RelationshipFault {
                object,
                relationship,
            } => Self::WillFaultRelationship {
                token,
                object,
                relationship,
            },
        }
    }

    pub(crate) fn did(token: RequestToken, kind: RequestKind, outcome: Outcome) -> Self {
        match kind {
            RequestKind::Fetch { entity } => Self::DidFetch {
                token,
                entity,
                outcome,
            },
            RequestKind::Save { operations } => Self::DidSave {
                token,
                operations,
                outcome,
            },
            RequestKind::AttributeFault { object } => Self::DidFaultAttributes {
                token,
                object,
                outcome,
            },
            RequestKind::RelationshipFault {
                object,
                relationship,
            } => Self::DidFaultRelationship {
                token,
                object,
                relationship,
                outcome,
            },
        }
    }

    pub fn token(&self) -> RequestToken {
        match self {
            Self::WillFetch { token, .. }
            | Self::DidFetch { token, .. }
            | Self::WillSave { token, .. }
            | Self::DidSave { token, .. }
            | Self::WillFaultAttributes { token, .. }
            | Self::DidFaultAttributes { token, .. }
            | Self::WillFaultRelationship { token, .. }
            | Self::DidFaultRelationship { token, .. } => *token,
        }
    }

    /// The resolved outcome, for `Did*` events
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Self::DidFetch { outcome, .. }
            | Self::DidSave { outcome, .. }
            | Self::DidFaultAttributes { outcome, .. }
            | Self::DidFaultRelationship { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    pub fn is_did(&self) -> bool {
        self.outcome().is_some()
    }
}
