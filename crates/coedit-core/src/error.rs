//! Error types for the replica and the wire codec.

use crate::id::OpId;
use thiserror::Error;

/// Errors raised while mutating a replica.
///
/// None of these are fatal: a rejected operation leaves the replica
/// untouched and the caller is expected to log and move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    #[error("Insert references unknown predecessor {0}")]
    UnknownPredecessor(OpId),

    #[error("Delete references unknown record {0}")]
    UnknownTarget(OpId),

    #[error("Record {0} already exists with a different character")]
    ConflictingInsert(OpId),

    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Replica already holds live operations")]
    LiveState,
}

/// Errors raised while decoding a wire frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty frame")]
    Empty,

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Invalid operation: {0}")]
    Invalid(&'static str),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
