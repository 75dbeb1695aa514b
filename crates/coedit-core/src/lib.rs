//! # coedit-core
//!
//! The document half of a coedit room: a replicated plain-text CRDT and the
//! codec that moves its operations over the wire.
//!
//! This crate provides:
//! - [`TextReplica`] - an RGA-style character sequence that converges under
//!   any delivery order and tolerates duplicate delivery
//! - [`diff`] - wholesale text replacement turned into positional edits
//! - [`codec`] - one-operation-per-frame JSON encoding plus room control frames
//!
//! ## Example
//!
//! ```rust
//! use coedit_core::{codec, TextReplica};
//!
//! let mut alice = TextReplica::new("alice");
//! let mut bob = TextReplica::new("bob");
//!
//! let ops = alice.apply_local("", "Hello");
//! for op in &ops {
//!     let frame = codec::encode(op);
//!     bob.apply_remote(&codec::decode(&frame).unwrap()).unwrap();
//! }
//! assert_eq!(bob.to_text(), "Hello");
//! ```

pub mod codec;
pub mod diff;
pub mod error;
pub mod id;
pub mod op;
pub mod replica;

pub use codec::{decode, decode_frame, encode, encode_frame, Control, Frame};
pub use diff::{apply_edits, diff};
pub use error::{DecodeError, ReplicaError};
pub use id::{OpId, ReplicaId};
pub use op::{Operation, TextEdit};
pub use replica::{Applied, ObserverId, TextReplica};
