//! Wire codec for room frames.
//!
//! Edits travel as one operation per frame, JSON encoded. A couple of
//! control frames let a member that just joined ask the room for its live
//! state. Anything that fails to decode is reported as a [`DecodeError`];
//! the receiving session drops the frame and carries on.

use crate::error::DecodeError;
use crate::op::Operation;
use serde::{Deserialize, Serialize};

/// Anything sent over a room channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Operation(Operation),
    Control(Control),
}

/// Room-level control frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Control {
    /// Sent on connect; members holding text answer with [`Control::State`].
    Sync,
    /// A member's whole log, in an order a fresh replica can apply.
    State { operations: Vec<Operation> },
}

/// Encode an operation into a transport frame.
pub fn encode(op: &Operation) -> Vec<u8> {
    // Operation only holds strings, integers and chars, so this cannot fail
    serde_json::to_vec(op).unwrap_or_default()
}

/// Decode a transport frame into an operation.
pub fn decode(frame: &[u8]) -> Result<Operation, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::Empty);
    }

    let op: Operation = serde_json::from_slice(frame)?;
    validate(&op)?;
    Ok(op)
}

/// Encode any frame.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    serde_json::to_vec(frame).unwrap_or_default()
}

/// Decode a frame that may be an operation or a control message.
pub fn decode_frame(frame: &[u8]) -> Result<Frame, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoded: Frame = serde_json::from_slice(frame)?;
    match &decoded {
        Frame::Operation(op) => validate(op)?,
        Frame::Control(Control::State { operations }) => {
            for op in operations {
                validate(op)?;
            }
        }
        Frame::Control(Control::Sync) => {}
    }
    Ok(decoded)
}

fn validate(op: &Operation) -> Result<(), DecodeError> {
    match op {
        Operation::Insert { id, after, .. } => {
            if id.replica.is_empty() {
                return Err(DecodeError::Invalid("insert id has an empty replica"));
            }
            if after.as_ref() == Some(id) {
                return Err(DecodeError::Invalid("insert is anchored after itself"));
            }
            if let Some(after) = after {
                if after.replica.is_empty() {
                    return Err(DecodeError::Invalid("predecessor has an empty replica"));
                }
            }
        }
        Operation::Delete { target } => {
            if target.replica.is_empty() {
                return Err(DecodeError::Invalid("delete target has an empty replica"));
            }
        }
    }
    Ok(())
}
