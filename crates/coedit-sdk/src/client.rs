//! High-level client for coedit rooms.

use crate::chat::ChatRelay;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::network::{MemoryHub, TransportFactory};
use crate::rest::{MemoryRest, RestApi};
use crate::session::{JoinParams, RoomSession};
use crate::snapshot::SnapshotGateway;
use coedit_core::ReplicaId;
use std::sync::Arc;

/// Who is editing and chatting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// A participant with a freshly generated id.
    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(ulid::Ulid::new().to_string().to_lowercase(), name)
    }
}

/// One joined room: the live document and its chat.
pub struct Room<R: RestApi> {
    pub session: RoomSession,
    pub chat: ChatRelay<R>,
}

impl<R: RestApi> Room<R> {
    pub fn name(&self) -> &str {
        self.session.room()
    }

    /// Leave the room. Chat history stays readable.
    pub async fn leave(&self) {
        self.session.leave().await;
    }
}

/// The coedit client.
///
/// # Example
///
/// ```rust
/// use coedit_sdk::quick;
///
/// # tokio_test::block_on(async {
/// let cluster = quick::memory_clients(&["Alice", "Bob"]);
/// let room = cluster.clients[0].join("notes").await.unwrap();
/// room.session.wait_active().await.unwrap();
///
/// room.session.edit("Hello").await.unwrap();
/// assert_eq!(room.session.text(), "Hello");
/// # });
/// ```
pub struct Client<F: TransportFactory, R: RestApi> {
    participant: Participant,
    transports: F,
    rest: Arc<R>,
    config: ClientConfig,
}

impl<F: TransportFactory, R: RestApi> Client<F, R> {
    pub fn new(participant: Participant, transports: F, rest: Arc<R>, config: ClientConfig) -> Self {
        Self {
            participant,
            transports,
            rest,
            config,
        }
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn user_name(&self) -> &str {
        &self.participant.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Join `room` with a fresh replica and load its chat history.
    pub async fn join(&self, room: &str) -> Result<Room<R>> {
        let params = JoinParams {
            room: room.to_string(),
            user_name: self.participant.name.clone(),
            replica_id: ReplicaId::generate(),
        };
        let session = RoomSession::join(
            params,
            self.transports.create(),
            SnapshotGateway::new(self.rest.clone()),
            &self.config,
        )
        .await?;

        let chat = ChatRelay::new(self.rest.clone(), session.room(), self.participant.clone());
        chat.load_history().await;
        Ok(Room { session, chat })
    }
}

/// Convenience functions for in-process rooms.
pub mod quick {
    use super::*;

    /// Clients sharing one relay and one store.
    pub struct MemoryCluster {
        pub hub: MemoryHub,
        pub rest: Arc<MemoryRest>,
        pub clients: Vec<Client<MemoryHub, MemoryRest>>,
    }

    /// Create one client per name, all wired to the same in-memory hub and
    /// REST store.
    pub fn memory_clients(user_names: &[&str]) -> MemoryCluster {
        let hub = MemoryHub::new();
        let rest = Arc::new(MemoryRest::new());
        let clients = user_names
            .iter()
            .map(|name| {
                Client::new(
                    Participant::generate(*name),
                    hub.clone(),
                    rest.clone(),
                    ClientConfig::default(),
                )
            })
            .collect();
        MemoryCluster { hub, rest, clients }
    }
}
