//! Mutating operations and their aggregate outcome.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::types::EventId;

/// A mutation that can be applied to many events at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    /// `POST /inbox/{id}/acknowledge`.
    Acknowledge,
    /// `DELETE /inbox/{id}`. Irreversible once the server accepts it.
    Delete,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkOperation::Acknowledge => f.write_str("acknowledge"),
            BulkOperation::Delete => f.write_str("delete"),
        }
    }
}

/// Per-id outcomes of one bulk invocation.
///
/// A snapshot of independent calls, not an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    /// Operation that was dispatched.
    pub operation: BulkOperation,
    /// Every id that was dispatched.
    pub requested: BTreeSet<EventId>,
    /// Ids whose call resolved without error.
    pub succeeded: BTreeSet<EventId>,
    /// Ids whose call failed, with the error message.
    pub failed: BTreeMap<EventId, String>,
}

impl BulkResult {
    /// Empty result for `requested`.
    pub fn new(operation: BulkOperation, requested: BTreeSet<EventId>) -> Self {
        Self {
            operation,
            requested,
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
        }
    }

    /// True when every requested id succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.succeeded.len() == self.requested.len()
    }

    /// True when some, but not all, ids succeeded.
    pub fn is_partial(&self) -> bool {
        !self.succeeded.is_empty() && !self.failed.is_empty()
    }

    /// One line per failed id, for display.
    pub fn failure_lines(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|(id, message)| format!("{id}: {message}"))
            .collect()
    }
}
