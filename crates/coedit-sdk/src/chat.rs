//! Per-room chat log.
//!
//! History is fetched once on join. Sent messages are appended locally as
//! [`DeliveryStatus::Pending`] before the POST goes out and are never rolled
//! back: a failed delivery stays visible as [`DeliveryStatus::Failed`] until
//! retried.

use crate::client::Participant;
use crate::error::{Result, SdkError};
use crate::rest::{ChatPost, RestApi};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A chat message as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub room: String,
    /// Known only for messages sent from this client.
    pub author_id: Option<String>,
    pub author_name: String,
    pub text: String,
    /// Receipt order within this log.
    pub order: u64,
    pub status: DeliveryStatus,
}

#[derive(Default)]
struct ChatLog {
    messages: Vec<ChatMessage>,
    next_order: u64,
}

impl ChatLog {
    fn push(&mut self, mut message: ChatMessage) -> ChatMessage {
        message.order = self.next_order;
        self.next_order += 1;
        self.messages.push(message.clone());
        message
    }

    fn set_status(&mut self, order: u64, status: DeliveryStatus) -> Option<ChatMessage> {
        let message = self.messages.iter_mut().find(|m| m.order == order)?;
        message.status = status;
        Some(message.clone())
    }
}

/// Chat relay for one room.
pub struct ChatRelay<R: RestApi> {
    rest: Arc<R>,
    room: String,
    participant: Participant,
    log: Arc<Mutex<ChatLog>>,
}

impl<R: RestApi> Clone for ChatRelay<R> {
    fn clone(&self) -> Self {
        Self {
            rest: self.rest.clone(),
            room: self.room.clone(),
            participant: self.participant.clone(),
            log: self.log.clone(),
        }
    }
}

impl<R: RestApi> ChatRelay<R> {
    pub fn new(rest: Arc<R>, room: impl Into<String>, participant: Participant) -> Self {
        Self {
            rest,
            room: room.into(),
            participant,
            log: Arc::new(Mutex::new(ChatLog::default())),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Replace the log with the server's history.
    ///
    /// A failed fetch is logged and leaves an empty log.
    pub async fn load_history(&self) -> Vec<ChatMessage> {
        let records = match self.rest.get_chat(&self.room).await {
            Ok(records) => records,
            Err(e) => {
                warn!(room = %self.room, error = %e, "chat history unavailable");
                Vec::new()
            }
        };
        debug!(room = %self.room, count = records.len(), "chat history loaded");

        let mut log = self.log.lock();
        *log = ChatLog::default();
        for record in records {
            log.push(ChatMessage {
                room: self.room.clone(),
                author_id: None,
                author_name: record.user_name,
                text: record.message,
                order: 0,
                status: DeliveryStatus::Confirmed,
            });
        }
        log.messages.clone()
    }

    /// Send `text` to the room.
    ///
    /// The message is in [`messages`](Self::messages) before this returns,
    /// whatever the outcome of delivery.
    pub async fn send(&self, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SdkError::EmptyMessage);
        }

        let message = self.log.lock().push(ChatMessage {
            room: self.room.clone(),
            author_id: Some(self.participant.id.clone()),
            author_name: self.participant.name.clone(),
            text: text.to_string(),
            order: 0,
            status: DeliveryStatus::Pending,
        });
        self.deliver(message).await
    }

    /// Deliver a failed message again. Messages that are not failed are
    /// returned unchanged.
    pub async fn retry(&self, order: u64) -> Result<ChatMessage> {
        let message = {
            let mut log = self.log.lock();
            let message = log
                .messages
                .iter()
                .find(|m| m.order == order)
                .cloned()
                .ok_or(SdkError::MessageNotFound(order))?;
            if message.status != DeliveryStatus::Failed {
                return Ok(message);
            }
            log.set_status(order, DeliveryStatus::Pending)
                .ok_or(SdkError::MessageNotFound(order))?
        };
        self.deliver(message).await
    }

    /// All messages in receipt order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.log.lock().messages.clone()
    }

    async fn deliver(&self, message: ChatMessage) -> Result<ChatMessage> {
        let post = ChatPost {
            room_id: self.room.clone(),
            user_id: self.participant.id.clone(),
            user_name: self.participant.name.clone(),
            message: message.text.clone(),
        };

        match self.rest.post_chat(&post).await {
            Ok(()) => self
                .log
                .lock()
                .set_status(message.order, DeliveryStatus::Confirmed)
                .ok_or(SdkError::MessageNotFound(message.order)),
            Err(e) => {
                warn!(room = %self.room, order = message.order, error = %e, "chat delivery failed");
                self.log.lock().set_status(message.order, DeliveryStatus::Failed);
                Err(SdkError::ChatDeliveryFailure(e.to_string()))
            }
        }
    }
}
