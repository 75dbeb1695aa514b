//! Transport abstractions for room channels.
//!
//! A transport carries opaque byte frames for exactly one room. The session
//! only relies on per-sender FIFO delivery to every other member while
//! connected, plus connect/disconnect/error signals.

use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Default capacity of a member's inbound queue.
const INBOX_CAPACITY: usize = 256;

/// Events delivered by a transport to its subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The room channel is open.
    Connected,
    /// A frame sent by another member.
    Frame(Vec<u8>),
    /// The connection was lost or closed.
    Disconnected,
    /// A non-fatal transport error.
    Error(String),
}

/// Abstract room channel.
#[async_trait]
pub trait RoomTransport: Send + Sync + 'static {
    /// Open the channel for `room`.
    async fn open(&self, room: &str) -> Result<(), TransportError>;

    /// Send a frame to every other member of the room.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Close the channel. Idempotent.
    async fn close(&self);

    /// Take the event stream. Only one subscriber is allowed.
    fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;
}

/// Creates one transport per room membership.
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: RoomTransport;

    fn create(&self) -> Self::Transport;
}

#[derive(Clone)]
struct Member {
    id: u64,
    inbox: mpsc::Sender<TransportEvent>,
}

/// In-process relay connecting [`MemoryTransport`]s by room.
#[derive(Clone, Default)]
pub struct MemoryHub {
    rooms: Arc<RwLock<HashMap<String, Vec<Member>>>>,
    offline: Arc<AtomicBool>,
    next_member: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this hub.
    pub fn transport(&self) -> MemoryTransport {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        MemoryTransport {
            member: self.next_member.fetch_add(1, Ordering::Relaxed),
            hub: self.clone(),
            room: RwLock::new(None),
            inbox: tx,
            events: Mutex::new(Some(rx)),
        }
    }

    /// Number of members currently in `room`.
    pub fn members(&self, room: &str) -> usize {
        self.rooms.read().get(room).map_or(0, Vec::len)
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Simulate an outage or its recovery. Members are told either way.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
        let event = if online {
            TransportEvent::Connected
        } else {
            TransportEvent::Disconnected
        };
        for members in self.rooms.read().values() {
            for member in members {
                let _ = member.inbox.try_send(event.clone());
            }
        }
    }

    fn join(&self, room: &str, member: Member) {
        self.rooms
            .write()
            .entry(room.to_string())
            .or_default()
            .push(member);
    }

    fn leave(&self, room: &str, member: u64) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room) {
            members.retain(|m| m.id != member);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    async fn relay(&self, room: &str, from: u64, frame: Vec<u8>) {
        let targets: Vec<Member> = {
            let rooms = self.rooms.read();
            rooms
                .get(room)
                .map(|members| members.iter().filter(|m| m.id != from).cloned().collect())
                .unwrap_or_default()
        };

        for member in targets {
            // A closed inbox means the member already left
            let _ = member.inbox.send(TransportEvent::Frame(frame.clone())).await;
        }
    }
}

/// In-memory transport for tests and demos.
pub struct MemoryTransport {
    member: u64,
    hub: MemoryHub,
    room: RwLock<Option<String>>,
    inbox: mpsc::Sender<TransportEvent>,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl MemoryTransport {
    pub fn room(&self) -> Option<String> {
        self.room.read().clone()
    }
}

#[async_trait]
impl RoomTransport for MemoryTransport {
    async fn open(&self, room: &str) -> Result<(), TransportError> {
        if !self.hub.is_online() {
            return Err(TransportError::Unavailable("hub offline".to_string()));
        }

        // Reopening replaces the previous membership
        let previous = self.room.write().take();
        if let Some(previous) = previous {
            self.hub.leave(&previous, self.member);
        }
        self.hub.join(
            room,
            Member {
                id: self.member,
                inbox: self.inbox.clone(),
            },
        );
        *self.room.write() = Some(room.to_string());
        debug!(room, member = self.member, "memory transport opened");

        let _ = self.inbox.send(TransportEvent::Connected).await;
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let room = self.room.read().clone().ok_or(TransportError::NotOpen)?;
        if !self.hub.is_online() {
            return Err(TransportError::Unavailable("hub offline".to_string()));
        }
        self.hub.relay(&room, self.member, frame).await;
        Ok(())
    }

    async fn close(&self) {
        if let Some(room) = self.room.write().take() {
            self.hub.leave(&room, self.member);
            let _ = self.inbox.try_send(TransportEvent::Disconnected);
        }
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.events
            .lock()
            .take()
            .ok_or(TransportError::AlreadySubscribed)
    }
}

impl TransportFactory for MemoryHub {
    type Transport = MemoryTransport;

    fn create(&self) -> MemoryTransport {
        self.transport()
    }
}
