//! coedit SDK - rooms with a live shared document and chat
//!
//! A room pairs a [`coedit_core::TextReplica`] kept in sync over a transport
//! with a REST-backed snapshot and chat log.
//!
//! # Quick Start
//!
//! ```rust
//! use coedit_sdk::quick;
//!
//! # tokio_test::block_on(async {
//! let cluster = quick::memory_clients(&["Alice", "Bob"]);
//! let alice = cluster.clients[0].join("standup").await.unwrap();
//! let bob = cluster.clients[1].join("standup").await.unwrap();
//! alice.session.wait_active().await.unwrap();
//! bob.session.wait_active().await.unwrap();
//!
//! alice.session.edit("- shipped the parser").await.unwrap();
//! bob.chat.send("nice").await.unwrap();
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`client`] - entry point: participants joining rooms
//! - [`session`] - the per-room state machine and its async driver
//! - [`snapshot`] - best-effort durable copy of the document
//! - [`chat`] - per-room message log with delivery status
//! - [`network`] - room transport trait and the in-memory hub
//! - [`ws`] - WebSocket transport
//! - [`rest`] - REST trait, HTTP client and in-memory store
//! - [`config`] - client configuration
//! - [`error`] - error types

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod rest;
pub mod session;
pub mod snapshot;
pub mod ws;

// Re-exports for convenience
pub use chat::{ChatMessage, ChatRelay, DeliveryStatus};
pub use client::{quick, Client, Participant, Room};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{RestError, Result, SdkError, TransportError};
pub use network::{MemoryHub, MemoryTransport, RoomTransport, TransportEvent, TransportFactory};
pub use rest::{ChatPost, ChatRecord, DocUpdate, HttpRest, MemoryRest, RestApi, SnapshotGate};
pub use session::{
    FrameOutcome, JoinParams, LocalChange, RoomSession, SessionEvent, SessionState,
    SnapshotOutcome, SyncSession,
};
pub use snapshot::{Snapshot, SnapshotGateway};
pub use ws::{WsConnector, WsTransport};

pub use coedit_core::{ReplicaId, TextReplica};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::chat::{ChatMessage, ChatRelay, DeliveryStatus};
    pub use crate::client::{Client, Participant, Room};
    pub use crate::config::ClientConfig;
    pub use crate::error::SdkError;
    pub use crate::network::{RoomTransport, TransportFactory};
    pub use crate::rest::RestApi;
    pub use crate::session::{RoomSession, SessionEvent, SessionState};
}
