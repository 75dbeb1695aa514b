//! Operations exchanged between replicas, and positional edits produced
//! by diffing two versions of the text.

use crate::id::OpId;
use serde::{Deserialize, Serialize};

/// An atomic insert or delete exchanged between replicas.
///
/// Operations are immutable once minted. A peer may receive the same one
/// several times; applying it again is a no-op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Insert `ch` right after the record `after` (`None` = document start).
    Insert {
        id: OpId,
        after: Option<OpId>,
        #[serde(rename = "char")]
        ch: char,
    },
    /// Tombstone the record `target`.
    Delete { target: OpId },
}

impl Operation {
    pub fn insert(id: OpId, after: Option<OpId>, ch: char) -> Self {
        Operation::Insert { id, after, ch }
    }

    pub fn delete(target: OpId) -> Self {
        Operation::Delete { target }
    }

    /// The record this operation creates or removes.
    pub fn subject(&self) -> &OpId {
        match self {
            Operation::Insert { id, .. } => id,
            Operation::Delete { target } => target,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Operation::Insert { .. })
    }
}

/// A positional edit against a linear string. Indices count chars.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextEdit {
    Insert { index: usize, text: String },
    Delete { index: usize, len: usize },
}
