//! Room sessions.
//!
//! [`SyncSession`] is the synchronous state machine for one room membership
//! (`Idle -> Joining -> Active -> Left`). It owns the text replica and decides
//! what every frame, snapshot and local edit does to it.
//!
//! [`RoomSession`] runs a `SyncSession` on its own tokio task. Every mutation
//! goes through that task, so the replica never needs a lock. Outgoing frames
//! are drained by one sender task in emission order; snapshot saves are
//! spawned separately and never awaited by the edit path.
//!
//! On every connect a member sends a sync request. Active members that have
//! integrated live operations answer with their whole log, which a member
//! that has seen no live operation adopts in place of its snapshot. A member
//! that parks an operation asks again, since the missing predecessor is in
//! some live member's log.

use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use crate::network::{RoomTransport, TransportEvent};
use crate::rest::RestApi;
use crate::snapshot::{Snapshot, SnapshotGateway};
use chrono::{DateTime, Duration, Utc};
use coedit_core::codec::{self, Control, Frame};
use coedit_core::{Applied, Operation, ReplicaError, ReplicaId, TextReplica};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on operations waiting for an unseen predecessor or target.
const PARKED_LIMIT: usize = 1024;

/// Lifecycle of a room membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    Active,
    Left,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::Active => "active",
            SessionState::Left => "left",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Integrated, together with this many parked operations it unblocked.
    Applied { unparked: usize },
    /// A replica without live operations took over the room's state.
    Adopted { operations: usize },
    /// Already seen.
    Duplicate,
    /// References an operation not seen yet; kept for a later retry.
    Parked,
    /// Frame to send back to the room.
    Reply(Vec<u8>),
    /// A control frame this member has nothing to answer to.
    Ignored,
    /// Undecodable or inconsistent; logged and forgotten.
    Dropped(String),
    /// The session is not joined.
    Discarded,
}

/// What happened to the snapshot fetched at join time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The replica was seeded from the snapshot text.
    Seeded,
    /// No stored text; the room starts empty.
    Empty,
    /// Live operations got there first, or the session is no longer joining.
    Discarded,
}

/// Result of a local edit: what to broadcast and what to persist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalChange {
    pub operations: Vec<Operation>,
    pub frames: Vec<Vec<u8>>,
    pub text: String,
}

impl LocalChange {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Single-owner state machine for one room membership.
pub struct SyncSession {
    replica_id: ReplicaId,
    state: SessionState,
    room: Option<String>,
    user_name: Option<String>,
    replica: Option<TextReplica>,
    parked: VecDeque<Operation>,
    /// Set when the parked queue stops being empty.
    resync: bool,
}

impl SyncSession {
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            replica_id: replica_id.into(),
            state: SessionState::Idle,
            room: None,
            user_name: None,
            replica: None,
            parked: VecDeque::new(),
            resync: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    /// Current document text; empty before join and after leave.
    pub fn text(&self) -> String {
        self.replica.as_ref().map(TextReplica::to_text).unwrap_or_default()
    }

    /// The live replica, for observer registration.
    pub fn replica_mut(&mut self) -> Option<&mut TextReplica> {
        self.replica.as_mut()
    }

    /// Whether the replica has integrated any live operation.
    pub fn has_live_operations(&self) -> bool {
        self.replica.as_ref().is_some_and(TextReplica::has_live_operations)
    }

    /// Operations waiting for a predecessor or target.
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    /// `Idle -> Joining`. On a validation failure the session stays idle.
    pub fn begin_join(&mut self, room: &str, user_name: &str) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(SdkError::NotActive(self.state.as_str()));
        }
        let room = room.trim();
        let user_name = user_name.trim();
        if room.is_empty() {
            return Err(SdkError::InvalidJoin("room code is empty".to_string()));
        }
        if user_name.is_empty() {
            return Err(SdkError::InvalidJoin("user name is empty".to_string()));
        }

        self.room = Some(room.to_string());
        self.user_name = Some(user_name.to_string());
        self.replica = Some(TextReplica::new(self.replica_id.clone()));
        self.state = SessionState::Joining;
        Ok(())
    }

    /// Route an inbound frame. Accepted while joining too, so edits that
    /// race the snapshot load are never lost.
    pub fn on_frame(&mut self, frame: &[u8]) -> FrameOutcome {
        if !self.is_joined() {
            return FrameOutcome::Discarded;
        }
        match codec::decode_frame(frame) {
            Ok(Frame::Operation(op)) => self.on_operation(op),
            Ok(Frame::Control(Control::Sync)) => match self.state_frame() {
                Some(reply) => FrameOutcome::Reply(reply),
                None => FrameOutcome::Ignored,
            },
            Ok(Frame::Control(Control::State { operations })) => self.on_state(operations),
            Err(e) => FrameOutcome::Dropped(e.to_string()),
        }
    }

    /// Frames to send whenever the transport (re)connects: a sync request,
    /// plus this member's own state if it is live.
    pub fn on_connected(&self) -> Vec<Vec<u8>> {
        if !self.is_joined() {
            return Vec::new();
        }
        let mut frames = vec![codec::encode_frame(&Frame::Control(Control::Sync))];
        frames.extend(self.state_frame());
        frames
    }

    /// A sync request owed after an operation was parked. Returned once per
    /// run of parked operations.
    pub fn take_sync_request(&mut self) -> Option<Vec<u8>> {
        if !std::mem::take(&mut self.resync) || !self.is_joined() {
            return None;
        }
        Some(codec::encode_frame(&Frame::Control(Control::Sync)))
    }

    fn is_joined(&self) -> bool {
        matches!(self.state, SessionState::Joining | SessionState::Active)
    }

    /// Only live state is offered. Seed-only text is minted from one member's
    /// snapshot and would duplicate the text at peers seeded differently.
    fn state_frame(&self) -> Option<Vec<u8>> {
        if self.state != SessionState::Active {
            return None;
        }
        let replica = self.replica.as_ref().filter(|r| r.has_live_operations())?;
        Some(codec::encode_frame(&Frame::Control(Control::State {
            operations: replica.export(),
        })))
    }

    fn on_operation(&mut self, op: Operation) -> FrameOutcome {
        let Some(replica) = self.replica.as_mut() else {
            return FrameOutcome::Discarded;
        };

        match replica.apply_remote(&op) {
            Ok(Applied::Integrated) => FrameOutcome::Applied {
                unparked: self.retry_parked(),
            },
            Ok(Applied::Duplicate) => FrameOutcome::Duplicate,
            Err(ReplicaError::UnknownPredecessor(_)) | Err(ReplicaError::UnknownTarget(_)) => {
                self.park(op);
                FrameOutcome::Parked
            }
            Err(e) => FrameOutcome::Dropped(e.to_string()),
        }
    }

    /// A peer's whole log. A replica that only holds snapshot text (or
    /// nothing) adopts it; a live one merges it.
    fn on_state(&mut self, operations: Vec<Operation>) -> FrameOutcome {
        let Some(replica) = self.replica.as_mut() else {
            return FrameOutcome::Discarded;
        };

        if !replica.has_live_operations() && !operations.is_empty() {
            let rejected = match replica.adopt(&operations) {
                Ok(rejected) => rejected,
                Err(e) => return FrameOutcome::Dropped(e.to_string()),
            };
            let adopted = operations.len() - rejected.len();
            for op in rejected {
                self.park(op);
            }
            self.retry_parked();
            return FrameOutcome::Adopted { operations: adopted };
        }

        let mut integrated = 0;
        let mut missing = Vec::new();
        for op in operations {
            match replica.apply_remote(&op) {
                Ok(Applied::Integrated) => integrated += 1,
                Ok(Applied::Duplicate) => {}
                Err(ReplicaError::UnknownPredecessor(_)) | Err(ReplicaError::UnknownTarget(_)) => {
                    missing.push(op)
                }
                Err(e) => warn!(error = %e, "state operation dropped"),
            }
        }
        for op in missing {
            self.park(op);
        }
        if integrated == 0 {
            return FrameOutcome::Duplicate;
        }
        FrameOutcome::Applied {
            unparked: self.retry_parked(),
        }
    }

    /// `Joining -> Active`. A snapshot only seeds a replica that has not
    /// integrated any live operation yet.
    pub fn on_snapshot(&mut self, snapshot: Option<Snapshot>) -> SnapshotOutcome {
        if self.state != SessionState::Joining {
            return SnapshotOutcome::Discarded;
        }
        self.state = SessionState::Active;
        let Some(replica) = self.replica.as_mut() else {
            return SnapshotOutcome::Discarded;
        };

        let outcome = match snapshot {
            Some(snapshot) if !snapshot.text.is_empty() => match replica.snapshot_load(&snapshot.text) {
                Ok(()) => SnapshotOutcome::Seeded,
                Err(e) => {
                    warn!(error = %e, "snapshot discarded");
                    SnapshotOutcome::Discarded
                }
            },
            _ => SnapshotOutcome::Empty,
        };
        self.retry_parked();
        outcome
    }

    /// Replace the document with `new_text`. Only allowed while active.
    pub fn local_edit(&mut self, new_text: &str) -> Result<LocalChange> {
        let replica = self.active_replica()?;
        let current = replica.to_text();
        let operations = replica.apply_local(&current, new_text);
        Ok(Self::change(replica, operations))
    }

    /// Append `text` at the end of the document. Only allowed while active.
    pub fn local_append(&mut self, text: &str) -> Result<LocalChange> {
        let replica = self.active_replica()?;
        let end = replica.len();
        // Inserting at the current length is always in bounds
        let operations = replica.insert(end, text).unwrap_or_default();
        Ok(Self::change(replica, operations))
    }

    /// `-> Left`. The replica is dropped; later frames are discarded.
    pub fn leave(&mut self) {
        self.state = SessionState::Left;
        self.replica = None;
        self.parked.clear();
        self.resync = false;
    }

    fn active_replica(&mut self) -> Result<&mut TextReplica> {
        if self.state != SessionState::Active {
            return Err(SdkError::NotActive(self.state.as_str()));
        }
        self.replica.as_mut().ok_or(SdkError::SessionClosed)
    }

    fn change(replica: &TextReplica, operations: Vec<Operation>) -> LocalChange {
        LocalChange {
            frames: operations.iter().map(codec::encode).collect(),
            operations,
            text: replica.to_text(),
        }
    }

    fn park(&mut self, op: Operation) {
        if self.parked.is_empty() {
            self.resync = true;
        }
        if self.parked.len() >= PARKED_LIMIT {
            if let Some(oldest) = self.parked.pop_front() {
                warn!(op = %oldest.subject(), "parked operation evicted");
            }
        }
        self.parked.push_back(op);
    }

    /// Re-apply parked operations until no more make progress.
    fn retry_parked(&mut self) -> usize {
        let Some(replica) = self.replica.as_mut() else {
            return 0;
        };
        let mut unparked = 0;
        loop {
            let before = self.parked.len();
            for op in std::mem::take(&mut self.parked) {
                match replica.apply_remote(&op) {
                    Ok(Applied::Integrated) => unparked += 1,
                    Ok(Applied::Duplicate) => {}
                    Err(ReplicaError::UnknownPredecessor(_)) | Err(ReplicaError::UnknownTarget(_)) => {
                        self.parked.push_back(op)
                    }
                    Err(e) => warn!(error = %e, "parked operation dropped"),
                }
            }
            if self.parked.is_empty() || self.parked.len() == before {
                return unparked;
            }
        }
    }
}

// ============================================================================
// Async driver
// ============================================================================

/// Events emitted by a [`RoomSession`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Joining,
    Active { seeded: bool },
    /// The join-time snapshot lost the race against live operations.
    SnapshotDiscarded,
    RemoteApplied,
    FrameDropped { reason: String },
    TransportConnected,
    TransportLost,
    Left,
}

/// Parameters of one room membership.
#[derive(Clone, Debug)]
pub struct JoinParams {
    pub room: String,
    pub user_name: String,
    pub replica_id: ReplicaId,
}

enum Command {
    Edit {
        text: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Append {
        text: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running room membership.
///
/// Dropping the handle leaves the room.
pub struct RoomSession {
    room: String,
    user_name: String,
    replica_id: ReplicaId,
    commands: mpsc::Sender<Command>,
    text: watch::Receiver<String>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl RoomSession {
    /// Join `params.room` over `transport`.
    ///
    /// Returns once the transport is open (or known to be unavailable, in
    /// which case editing stays local and the transport is reopened every
    /// [`ClientConfig::reconnect_interval`]). The snapshot load continues on the
    /// session task; use [`RoomSession::wait_active`] to wait for it. With a
    /// live transport, a loaded snapshot is held for up to
    /// [`ClientConfig::sync_window`] so peers can answer with the room's
    /// live state first.
    pub async fn join<T, R>(
        params: JoinParams,
        transport: T,
        gateway: SnapshotGateway<R>,
        config: &ClientConfig,
    ) -> Result<Self>
    where
        T: RoomTransport,
        R: RestApi,
    {
        let mut sync = SyncSession::new(params.replica_id.clone());
        sync.begin_join(&params.room, &params.user_name)?;
        let room = sync.room().unwrap_or_default().to_string();
        let user_name = sync.user_name().unwrap_or_default().to_string();

        let (text_tx, text_rx) = watch::channel(String::new());
        if let Some(replica) = sync.replica_mut() {
            replica.subscribe(move |text| {
                text_tx.send_replace(text.to_string());
            });
        }
        let (state_tx, state_rx) = watch::channel(sync.state());
        let (events_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity.max(1));
        let _ = events_tx.send(SessionEvent::Joining);

        let transport = Arc::new(transport);
        let transport_events = match transport.subscribe() {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(room = %room, error = %e, "transport events unavailable");
                None
            }
        };
        let connected = match transport.open(&room).await {
            Ok(()) => true,
            Err(e) => {
                warn!(room = %room, error = %SdkError::from(e), "editing locally until the transport is back");
                false
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let sender = tokio::spawn(send_frames(transport.clone(), outbound_rx));

        let mut driver = Driver {
            sync,
            room: room.clone(),
            transport,
            gateway,
            outbound: Some(outbound_tx),
            sender: Some(sender),
            reconnect: None,
            reconnect_interval: config.reconnect_interval(),
            state: state_tx,
            events: events_tx.clone(),
            last_save: None,
            sync_deadline: connected.then(|| Instant::now() + config.sync_window()),
        };
        if !connected {
            driver.start_reconnect();
        }
        tokio::spawn(driver.run(command_rx, transport_events));
        info!(room = %room, user = %user_name, replica = %params.replica_id, "joining room");

        Ok(Self {
            room,
            user_name,
            replica_id: params.replica_id,
            commands: command_tx,
            text: text_rx,
            state: state_rx,
            events: events_tx,
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    /// Last rendered document text.
    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    /// Receiver updated after every mutation of the document.
    pub fn watch_text(&self) -> watch::Receiver<String> {
        self.text.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the join-time snapshot has been reconciled.
    pub async fn wait_active(&self) -> Result<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| matches!(s, SessionState::Active | SessionState::Left))
            .await
            .map_err(|_| SdkError::SessionClosed)?;
        match *reached {
            SessionState::Active => Ok(()),
            _ => Err(SdkError::SessionClosed),
        }
    }

    /// Replace the document with `new_text`.
    ///
    /// Resolves once the local replica has changed; broadcasting and saving
    /// happen in the background. Returns the rendered text.
    pub async fn edit(&self, new_text: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Edit {
            text: new_text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SdkError::SessionClosed)?
    }

    /// Append `text` at the end of the document.
    pub async fn append(&self, text: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Append {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SdkError::SessionClosed)?
    }

    /// Leave the room: close the transport and drop the replica. Idempotent.
    pub async fn leave(&self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::Leave { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn request(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SdkError::SessionClosed)
    }
}

impl fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSession")
            .field("room", &self.room)
            .field("user_name", &self.user_name)
            .field("replica_id", &self.replica_id)
            .field("state", &self.state())
            .finish()
    }
}

struct Driver<T: RoomTransport, R: RestApi> {
    sync: SyncSession,
    room: String,
    transport: Arc<T>,
    gateway: SnapshotGateway<R>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    sender: Option<JoinHandle<()>>,
    /// Running while the transport is down.
    reconnect: Option<JoinHandle<()>>,
    reconnect_interval: std::time::Duration,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    last_save: Option<DateTime<Utc>>,
    /// Until then a loaded snapshot waits for the room's live state.
    sync_deadline: Option<Instant>,
}

impl<T: RoomTransport, R: RestApi> Driver<T, R> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: Option<mpsc::Receiver<TransportEvent>>,
    ) {
        let gateway = self.gateway.clone();
        let room = self.room.clone();
        let load = async move { gateway.load(&room).await };
        tokio::pin!(load);
        let mut loading = true;
        // Loaded but not reconciled yet
        let mut loaded: Option<Option<Snapshot>> = None;

        loop {
            if loaded.is_some() && self.sync.has_live_operations() {
                self.on_snapshot(loaded.take().flatten());
            }

            tokio::select! {
                result = &mut load, if loading => {
                    loading = false;
                    loaded = Some(result.unwrap_or_else(|e| {
                        warn!(room = %self.room, error = %e, "starting from an empty document");
                        None
                    }));
                }
                _ = wait_until(self.sync_deadline), if loaded.is_some() => {
                    self.on_snapshot(loaded.take().flatten());
                }
                Some(event) = next_event(&mut transport_events) => self.on_transport(event),
                command = commands.recv() => match command {
                    Some(Command::Edit { text, reply }) => {
                        let result = self.sync.local_edit(&text).map(|change| self.dispatch(change));
                        let _ = reply.send(result);
                    }
                    Some(Command::Append { text, reply }) => {
                        let result = self.sync.local_append(&text).map(|change| self.dispatch(change));
                        let _ = reply.send(result);
                    }
                    Some(Command::Leave { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }
    }

    fn on_snapshot(&mut self, snapshot: Option<Snapshot>) {
        let outcome = self.sync.on_snapshot(snapshot);
        debug!(room = %self.room, ?outcome, "snapshot reconciled");
        if outcome == SnapshotOutcome::Discarded {
            let _ = self.events.send(SessionEvent::SnapshotDiscarded);
        }
        self.publish_state();
        let _ = self.events.send(SessionEvent::Active {
            seeded: outcome == SnapshotOutcome::Seeded,
        });
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => match self.sync.on_frame(&frame) {
                FrameOutcome::Applied { unparked } => {
                    if unparked > 0 {
                        debug!(room = %self.room, unparked, "parked operations integrated");
                    }
                    let _ = self.events.send(SessionEvent::RemoteApplied);
                }
                FrameOutcome::Adopted { operations } => {
                    info!(room = %self.room, operations, "adopted the room's live state");
                    let _ = self.events.send(SessionEvent::RemoteApplied);
                }
                FrameOutcome::Reply(frame) => self.queue(vec![frame]),
                FrameOutcome::Duplicate | FrameOutcome::Ignored => {}
                FrameOutcome::Parked => {
                    debug!(room = %self.room, parked = self.sync.parked(), "operation parked");
                }
                FrameOutcome::Dropped(reason) => {
                    warn!(room = %self.room, %reason, "frame dropped");
                    let _ = self.events.send(SessionEvent::FrameDropped { reason });
                }
                FrameOutcome::Discarded => {}
            },
            TransportEvent::Connected => {
                self.stop_reconnect();
                self.queue(self.sync.on_connected());
                let _ = self.events.send(SessionEvent::TransportConnected);
            }
            TransportEvent::Disconnected => {
                warn!(room = %self.room, "transport lost");
                self.start_reconnect();
                let _ = self.events.send(SessionEvent::TransportLost);
            }
            TransportEvent::Error(e) => warn!(room = %self.room, error = %e, "transport error"),
        }
        if let Some(request) = self.sync.take_sync_request() {
            debug!(room = %self.room, "requesting the room's state");
            self.queue(vec![request]);
        }
    }

    fn start_reconnect(&mut self) {
        if self.reconnect.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        self.reconnect = Some(tokio::spawn(reopen(
            self.transport.clone(),
            self.room.clone(),
            self.reconnect_interval,
        )));
    }

    fn stop_reconnect(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
    }

    /// Queue frames for broadcast and persist the new text. Neither is awaited.
    fn dispatch(&mut self, change: LocalChange) -> String {
        if change.is_empty() {
            return change.text;
        }
        self.queue(change.frames);
        let timestamp = self.next_save_timestamp();
        self.gateway.save(&self.room, change.text.clone(), timestamp);
        change.text
    }

    fn queue(&self, frames: Vec<Vec<u8>>) {
        if let Some(outbound) = &self.outbound {
            for frame in frames {
                let _ = outbound.send(frame);
            }
        }
    }

    /// Strictly increasing per session, so a later save always wins.
    fn next_save_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_save {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_save = Some(timestamp);
        timestamp
    }

    async fn shutdown(&mut self) {
        self.stop_reconnect();
        self.sync.leave();
        self.publish_state();

        // Flush frames already queued, then close
        self.outbound.take();
        if let Some(sender) = self.sender.take() {
            let _ = sender.await;
        }
        self.transport.close().await;
        info!(room = %self.room, "left room");
        let _ = self.events.send(SessionEvent::Left);
    }

    fn publish_state(&self) {
        self.state.send_replace(self.sync.state());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Reopen `room` until it succeeds. The transport reports `Connected`, which
/// stops this task and restarts the sync handshake.
async fn reopen<T: RoomTransport>(transport: Arc<T>, room: String, interval: std::time::Duration) {
    loop {
        tokio::time::sleep(interval).await;
        match transport.open(&room).await {
            Ok(()) => {
                info!(room = %room, "transport reopened");
                return;
            }
            Err(e) => debug!(room = %room, error = %e, "transport still unavailable"),
        }
    }
}

async fn send_frames<T: RoomTransport>(transport: Arc<T>, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = transport.send(frame).await {
            debug!(error = %e, "frame not sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_core::OpId;

    fn active(replica: &str) -> SyncSession {
        let mut session = SyncSession::new(replica);
        session.begin_join("room", "ana").unwrap();
        session.on_snapshot(None);
        session
    }

    #[test]
    fn test_join_validation_keeps_idle() {
        let mut session = SyncSession::new("A");
        assert!(matches!(session.begin_join("  ", "ana"), Err(SdkError::InvalidJoin(_))));
        assert!(matches!(session.begin_join("room", ""), Err(SdkError::InvalidJoin(_))));
        assert_eq!(session.state(), SessionState::Idle);

        session.begin_join(" room ", "ana").unwrap();
        assert_eq!(session.state(), SessionState::Joining);
        assert_eq!(session.room(), Some("room"));
        assert_eq!(
            session.begin_join("other", "ana"),
            Err(SdkError::NotActive("joining"))
        );
    }

    #[test]
    fn test_snapshot_seeds_fresh_replica() {
        let mut session = SyncSession::new("A");
        session.begin_join("room", "ana").unwrap();
        assert_eq!(
            session.on_snapshot(Some(Snapshot::new("hello"))),
            SnapshotOutcome::Seeded
        );
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.text(), "hello");
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let mut session = SyncSession::new("A");
        session.begin_join("room", "ana").unwrap();
        assert_eq!(session.on_snapshot(None), SnapshotOutcome::Empty);
        assert_eq!(session.on_snapshot(Some(Snapshot::new("late"))), SnapshotOutcome::Discarded);
        assert_eq!(session.text(), "");
    }

    #[test]
    fn test_live_operation_beats_snapshot() {
        let mut peer = active("B");
        let change = peer.local_edit("live").unwrap();

        let mut session = SyncSession::new("A");
        session.begin_join("room", "ana").unwrap();
        for frame in &change.frames {
            assert!(matches!(session.on_frame(frame), FrameOutcome::Applied { .. }));
        }
        assert_eq!(
            session.on_snapshot(Some(Snapshot::new("stale"))),
            SnapshotOutcome::Discarded
        );
        assert_eq!(session.text(), "live");
    }

    #[test]
    fn test_edits_on_seed_wait_for_snapshot() {
        let mut peer = SyncSession::new("B");
        peer.begin_join("room", "bo").unwrap();
        peer.on_snapshot(Some(Snapshot::new("hello")));
        let change = peer.local_edit("hello!").unwrap();

        let mut session = SyncSession::new("A");
        session.begin_join("room", "ana").unwrap();
        assert_eq!(session.on_frame(&change.frames[0]), FrameOutcome::Parked);
        assert_eq!(session.parked(), 1);

        assert_eq!(
            session.on_snapshot(Some(Snapshot::new("hello"))),
            SnapshotOutcome::Seeded
        );
        assert_eq!(session.parked(), 0);
        assert_eq!(session.text(), "hello!");
    }

    #[test]
    fn test_local_edit_requires_active() {
        let mut session = SyncSession::new("A");
        assert_eq!(session.local_edit("x"), Err(SdkError::NotActive("idle")));
        session.begin_join("room", "ana").unwrap();
        assert_eq!(session.local_edit("x"), Err(SdkError::NotActive("joining")));
        session.on_snapshot(None);

        let change = session.local_edit("x").unwrap();
        assert_eq!(change.text, "x");
        assert_eq!(
            change.operations,
            vec![Operation::insert(OpId::new("A", 0), None, 'x')]
        );
        assert_eq!(change.frames, vec![codec::encode(&change.operations[0])]);

        let change = session.local_append("yz").unwrap();
        assert_eq!(change.text, "xyz");
        assert_eq!(change.operations.len(), 2);
        assert!(session.local_edit("xyz").unwrap().is_empty());
    }

    #[test]
    fn test_bad_frames_are_dropped() {
        let mut session = active("A");
        assert!(matches!(session.on_frame(b""), FrameOutcome::Dropped(_)));
        assert!(matches!(session.on_frame(b"{not json"), FrameOutcome::Dropped(_)));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_duplicate_frame() {
        let mut peer = active("B");
        let change = peer.local_edit("a").unwrap();
        let mut session = active("A");
        assert_eq!(session.on_frame(&change.frames[0]), FrameOutcome::Applied { unparked: 0 });
        assert_eq!(session.on_frame(&change.frames[0]), FrameOutcome::Duplicate);
    }

    #[test]
    fn test_out_of_order_frames_unpark() {
        let mut peer = active("B");
        let change = peer.local_edit("abc").unwrap();
        let mut session = active("A");

        assert_eq!(session.on_frame(&change.frames[2]), FrameOutcome::Parked);
        assert_eq!(session.on_frame(&change.frames[1]), FrameOutcome::Parked);
        assert_eq!(session.on_frame(&change.frames[0]), FrameOutcome::Applied { unparked: 2 });
        assert_eq!(session.text(), "abc");
    }

    #[test]
    fn test_left_discards_frames() {
        let mut peer = active("B");
        let change = peer.local_edit("late").unwrap();
        let mut session = active("A");
        session.leave();

        assert_eq!(session.state(), SessionState::Left);
        assert_eq!(session.on_frame(&change.frames[0]), FrameOutcome::Discarded);
        assert_eq!(session.text(), "");
        assert_eq!(session.local_edit("x"), Err(SdkError::NotActive("left")));
    }

    #[test]
    fn test_sync_request_answered_with_state() {
        let mut peer = active("B");
        peer.local_edit("shared").unwrap();

        let mut joiner = SyncSession::new("A");
        joiner.begin_join("room", "ana").unwrap();
        let hello = joiner.on_connected();
        assert_eq!(hello.len(), 1);

        let FrameOutcome::Reply(state) = peer.on_frame(&hello[0]) else {
            panic!("peer did not answer the sync request");
        };
        assert_eq!(joiner.on_frame(&state), FrameOutcome::Adopted { operations: 6 });
        assert_eq!(joiner.text(), "shared");
        assert_eq!(
            joiner.on_snapshot(Some(Snapshot::new("shared"))),
            SnapshotOutcome::Discarded
        );
        assert_eq!(joiner.on_connected().len(), 2);
    }

    #[test]
    fn test_empty_member_ignores_sync() {
        let mut member = active("A");
        let mut joiner = SyncSession::new("B");
        joiner.begin_join("room", "bo").unwrap();
        assert_eq!(member.on_frame(&joiner.on_connected()[0]), FrameOutcome::Ignored);
    }

    #[test]
    fn test_live_member_merges_state() {
        let mut a = active("A");
        a.local_edit("x").unwrap();
        let mut b = active("B");
        b.local_edit("y").unwrap();

        let state = b.on_connected().pop().unwrap();
        assert!(matches!(a.on_frame(&state), FrameOutcome::Applied { .. }));
        assert_eq!(a.on_frame(&state), FrameOutcome::Duplicate);
        assert_eq!(a.text().chars().count(), 2);
    }

    fn seeded(replica: &str, text: &str) -> SyncSession {
        let mut session = SyncSession::new(replica);
        session.begin_join("room", replica).unwrap();
        session.on_snapshot(Some(Snapshot::new(text)));
        session
    }

    #[test]
    fn test_seed_only_member_never_answers_sync() {
        // A edited its seed; C seeded from the later save and never edited
        let mut a = seeded("A", "hello");
        a.local_edit("hello!").unwrap();
        let mut c = seeded("C", "hello!");
        assert!(!c.has_live_operations());
        assert_eq!(c.on_connected().len(), 1);

        let mut joiner = SyncSession::new("J");
        joiner.begin_join("room", "jo").unwrap();
        let request = joiner.on_connected().remove(0);

        assert_eq!(c.on_frame(&request), FrameOutcome::Ignored);
        let FrameOutcome::Reply(state) = a.on_frame(&request) else {
            panic!("live member did not answer the sync request");
        };

        // The reply is relayed to every other member
        assert_eq!(joiner.on_frame(&state), FrameOutcome::Adopted { operations: 6 });
        assert_eq!(c.on_frame(&state), FrameOutcome::Adopted { operations: 6 });
        assert_eq!(
            joiner.on_snapshot(Some(Snapshot::new("hello!"))),
            SnapshotOutcome::Discarded
        );
        for member in [&a, &c, &joiner] {
            assert_eq!(member.text(), "hello!");
        }

        let change = joiner.local_append("?").unwrap();
        assert!(matches!(a.on_frame(&change.frames[0]), FrameOutcome::Applied { .. }));
        assert!(matches!(c.on_frame(&change.frames[0]), FrameOutcome::Applied { .. }));
        for member in [&a, &c, &joiner] {
            assert_eq!(member.text(), "hello!?");
        }
    }

    #[test]
    fn test_parking_requests_the_room_state() {
        let mut peer = seeded("B", "hello");
        let mut joiner = SyncSession::new("A");
        joiner.begin_join("room", "ana").unwrap();

        // Nothing live to answer with yet
        assert_eq!(peer.on_frame(&joiner.on_connected()[0]), FrameOutcome::Ignored);
        assert_eq!(joiner.take_sync_request(), None);

        let change = peer.local_edit("hello!!").unwrap();
        assert_eq!(joiner.on_frame(&change.frames[0]), FrameOutcome::Parked);
        let request = joiner.take_sync_request().unwrap();
        assert_eq!(joiner.on_frame(&change.frames[1]), FrameOutcome::Parked);
        assert_eq!(joiner.take_sync_request(), None);

        let FrameOutcome::Reply(state) = peer.on_frame(&request) else {
            panic!("live member did not answer the sync request");
        };
        assert_eq!(joiner.on_frame(&state), FrameOutcome::Adopted { operations: 7 });
        assert_eq!(joiner.parked(), 0);
        assert_eq!(joiner.text(), "hello!!");
        assert_eq!(
            joiner.on_snapshot(Some(Snapshot::new("hello"))),
            SnapshotOutcome::Discarded
        );
        assert_eq!(joiner.text(), "hello!!");
    }
}
