//! Error types for the coedit SDK.
//!
//! Every failure here is contained at the component that raised it. Only
//! join validation ever reaches the user; everything else is logged and the
//! room keeps working.

use thiserror::Error;

/// Error type for SDK operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// Room or name missing on join; the session stays idle.
    #[error("Invalid join request: {0}")]
    InvalidJoin(String),

    /// No live connection. Editing continues locally.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Durable snapshot could not be read or written.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// A chat message could not be delivered to the server.
    #[error("Chat delivery failure: {0}")]
    ChatDeliveryFailure(String),

    #[error("Chat message is empty")]
    EmptyMessage,

    #[error("Chat message not found: {0}")]
    MessageNotFound(u64),

    /// The session is not in a state that accepts this call.
    #[error("Session is {0}")]
    NotActive(&'static str),

    /// The session task is gone.
    #[error("Session closed")]
    SessionClosed,
}

/// Errors raised by a [`RoomTransport`](crate::network::RoomTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Unavailable(String),

    #[error("Channel is not open")]
    NotOpen,

    #[error("Transport already has a subscriber")]
    AlreadySubscribed,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl From<TransportError> for SdkError {
    fn from(err: TransportError) -> Self {
        SdkError::TransportUnavailable(err.to_string())
    }
}

/// Errors raised by a [`RestApi`](crate::rest::RestApi).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Server offline")]
    Offline,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RestError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RestError::Status(status.as_u16())
        } else {
            RestError::Network(err.to_string())
        }
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
