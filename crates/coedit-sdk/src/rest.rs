//! REST seam: document snapshots and chat history.
//!
//! [`HttpRest`] talks to the room server over HTTP. [`MemoryRest`] is an
//! in-process authority with the same storage rules, used by tests and the
//! demo CLI.

use crate::config::ClientConfig;
use crate::error::RestError;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Body of `POST /api/update`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub room: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry of `GET /api/chat/{room}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub message: String,
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPost {
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
}

/// Snapshot and chat endpoints of the room server.
#[async_trait]
pub trait RestApi: Send + Sync + 'static {
    /// Latest stored text for `room`, or `None` if nothing was ever saved.
    async fn get_doc(&self, room: &str) -> Result<Option<Snapshot>, RestError>;

    async fn post_update(&self, update: &DocUpdate) -> Result<(), RestError>;

    /// Chat history for `room` in server order.
    async fn get_chat(&self, room: &str) -> Result<Vec<ChatRecord>, RestError>;

    async fn post_chat(&self, post: &ChatPost) -> Result<(), RestError>;
}

// ============================================================================
// HTTP
// ============================================================================

/// reqwest-backed client for the room server.
#[derive(Clone, Debug)]
pub struct HttpRest {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpRest {
    pub fn new(config: ClientConfig) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { http, config })
    }

    fn check(status: StatusCode) -> Result<(), RestError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(RestError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl RestApi for HttpRest {
    async fn get_doc(&self, room: &str) -> Result<Option<Snapshot>, RestError> {
        let url = self.config.api_endpoint(&["api", "doc", room])?;
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(room, "no stored snapshot");
            return Ok(None);
        }
        Self::check(response.status())?;

        let text = response.text().await?;
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(Snapshot::new(text)))
    }

    async fn post_update(&self, update: &DocUpdate) -> Result<(), RestError> {
        let url = self.config.api_endpoint(&["api", "update"])?;
        let response = self.http.post(url).json(update).send().await?;
        Self::check(response.status())
    }

    async fn get_chat(&self, room: &str) -> Result<Vec<ChatRecord>, RestError> {
        let url = self.config.api_endpoint(&["api", "chat", room])?;
        let response = self.http.get(url).send().await?;
        Self::check(response.status())?;
        Ok(response.json().await?)
    }

    async fn post_chat(&self, post: &ChatPost) -> Result<(), RestError> {
        let url = self.config.api_endpoint(&["api", "chat"])?;
        let response = self.http.post(url).json(post).send().await?;
        Self::check(response.status())
    }
}

// ============================================================================
// In-memory authority
// ============================================================================

#[derive(Clone, Debug)]
struct StoredDoc {
    content: String,
    timestamp: DateTime<Utc>,
}

/// Holds `get_doc` calls on a [`MemoryRest`] until released.
#[derive(Clone, Debug)]
pub struct SnapshotGate {
    semaphore: Arc<Semaphore>,
}

impl SnapshotGate {
    /// Let every held and future `get_doc` through.
    pub fn release(&self) {
        self.semaphore.close();
    }
}

/// In-memory room server.
///
/// A document update is stored only if its timestamp is strictly newer than
/// the stored one. Chat messages are appended in arrival order.
#[derive(Clone, Default)]
pub struct MemoryRest {
    docs: Arc<RwLock<HashMap<String, StoredDoc>>>,
    chat: Arc<RwLock<HashMap<String, Vec<ChatRecord>>>>,
    offline: Arc<AtomicBool>,
    updates: Arc<AtomicU64>,
    gate: Arc<RwLock<Option<Arc<Semaphore>>>>,
}

impl MemoryRest {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`RestError::Offline`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Block `get_doc` until the returned gate is released.
    pub fn hold_snapshots(&self) -> SnapshotGate {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.gate.write() = Some(semaphore.clone());
        SnapshotGate { semaphore }
    }

    /// Number of accepted `post_update` calls, stored or not.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Currently stored text for `room`.
    pub fn document(&self, room: &str) -> Option<String> {
        self.docs.read().get(room).map(|d| d.content.clone())
    }

    /// Store `content` directly, as if saved by an earlier session.
    pub fn seed_document(&self, room: &str, content: &str, timestamp: DateTime<Utc>) {
        self.docs.write().insert(
            room.to_string(),
            StoredDoc {
                content: content.to_string(),
                timestamp,
            },
        );
    }

    pub fn chat_log(&self, room: &str) -> Vec<ChatRecord> {
        self.chat.read().get(room).cloned().unwrap_or_default()
    }

    fn ensure_online(&self) -> Result<(), RestError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RestError::Offline)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RestApi for MemoryRest {
    async fn get_doc(&self, room: &str) -> Result<Option<Snapshot>, RestError> {
        let gate = self.gate.read().clone();
        if let Some(semaphore) = gate {
            // Closed means released
            let _ = semaphore.acquire().await;
        }
        self.ensure_online()?;

        Ok(self
            .docs
            .read()
            .get(room)
            .filter(|d| !d.content.is_empty())
            .map(|d| Snapshot::with_timestamp(d.content.clone(), d.timestamp)))
    }

    async fn post_update(&self, update: &DocUpdate) -> Result<(), RestError> {
        self.ensure_online()?;
        self.updates.fetch_add(1, Ordering::SeqCst);

        let mut docs = self.docs.write();
        match docs.get_mut(&update.room) {
            Some(stored) if update.timestamp <= stored.timestamp => {
                debug!(room = %update.room, "stale update ignored");
            }
            Some(stored) => {
                stored.content = update.content.clone();
                stored.timestamp = update.timestamp;
            }
            None => {
                docs.insert(
                    update.room.clone(),
                    StoredDoc {
                        content: update.content.clone(),
                        timestamp: update.timestamp,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_chat(&self, room: &str) -> Result<Vec<ChatRecord>, RestError> {
        self.ensure_online()?;
        Ok(self.chat_log(room))
    }

    async fn post_chat(&self, post: &ChatPost) -> Result<(), RestError> {
        self.ensure_online()?;
        self.chat
            .write()
            .entry(post.room_id.clone())
            .or_default()
            .push(ChatRecord {
                user_name: post.user_name.clone(),
                message: post.message.clone(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn update(room: &str, content: &str, timestamp: DateTime<Utc>) -> DocUpdate {
        DocUpdate {
            room: room.to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_wire_shapes() {
        let post = ChatPost {
            room_id: "r1".into(),
            user_id: "u1".into(),
            user_name: "Ana".into(),
            message: "hi".into(),
        };
        assert_eq!(
            serde_json::to_value(&post).unwrap(),
            serde_json::json!({"roomId": "r1", "userId": "u1", "userName": "Ana", "message": "hi"})
        );

        let record: ChatRecord =
            serde_json::from_str(r#"{"userName":"Bo","message":"yo"}"#).unwrap();
        assert_eq!(record.user_name, "Bo");
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let rest = MemoryRest::new();
        let t0 = Utc::now();

        rest.post_update(&update("r", "first", t0)).await.unwrap();
        rest.post_update(&update("r", "older", t0 - Duration::seconds(1))).await.unwrap();
        assert_eq!(rest.document("r").as_deref(), Some("first"));

        // Equal timestamps do not replace
        rest.post_update(&update("r", "same", t0)).await.unwrap();
        assert_eq!(rest.document("r").as_deref(), Some("first"));

        rest.post_update(&update("r", "newer", t0 + Duration::seconds(1))).await.unwrap();
        assert_eq!(rest.document("r").as_deref(), Some("newer"));
        assert_eq!(rest.update_count(), 4);
    }

    #[tokio::test]
    async fn test_missing_and_empty_documents() {
        let rest = MemoryRest::new();
        assert_eq!(rest.get_doc("nope").await.unwrap(), None);

        rest.seed_document("blank", "", Utc::now());
        assert_eq!(rest.get_doc("blank").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline() {
        let rest = MemoryRest::new();
        rest.set_offline(true);
        assert_eq!(rest.get_chat("r").await, Err(RestError::Offline));
        rest.set_offline(false);
        assert_eq!(rest.get_chat("r").await, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn test_snapshot_gate() {
        let rest = MemoryRest::new();
        rest.seed_document("r", "held", Utc::now());
        let gate = rest.hold_snapshots();

        let pending = tokio::spawn({
            let rest = rest.clone();
            async move { rest.get_doc("r").await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        gate.release();
        let snapshot = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(snapshot.text, "held");
    }
}
