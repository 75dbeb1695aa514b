//! WebSocket room transport.
//!
//! Connects to `{ws_url}/{room}` and exchanges binary frames. A writer task
//! drains an outgoing queue into the socket so sends from the session never
//! wait on the network; a reader task turns socket messages into
//! [`TransportEvent`]s.

use crate::config::join_segments;
use crate::error::TransportError;
use crate::network::{RoomTransport, TransportEvent, TransportFactory};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 256;

/// Room transport over a WebSocket connection.
pub struct WsTransport {
    ws_url: String,
    outgoing: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    inbox: mpsc::Sender<TransportEvent>,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl WsTransport {
    /// `ws_url` is the relay base, e.g. `ws://localhost:1234/ws`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            ws_url: ws_url.into(),
            outgoing: Mutex::new(None),
            reader: Mutex::new(None),
            inbox: tx,
            events: Mutex::new(Some(rx)),
        }
    }

    fn room_url(&self, room: &str) -> Result<String, TransportError> {
        join_segments(&self.ws_url, &[room])
            .map(String::from)
            .map_err(TransportError::Unavailable)
    }
}

#[async_trait]
impl RoomTransport for WsTransport {
    async fn open(&self, room: &str) -> Result<(), TransportError> {
        let url = self.room_url(room)?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        debug!(%url, "websocket connected");

        let (mut writer, mut reader) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(QUEUE_CAPACITY);

        // Writer task: forward the outgoing queue to the socket
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = writer.send(WsMessage::Binary(frame.into())).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        // Reader task: socket messages become transport events
        let inbox = self.inbox.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                let event = match msg {
                    Ok(WsMessage::Binary(data)) => TransportEvent::Frame(data.to_vec()),
                    Ok(WsMessage::Text(text)) => TransportEvent::Frame(text.as_bytes().to_vec()),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbox.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if inbox.send(event).await.is_err() {
                    break;
                }
            }
            let _ = inbox.send(TransportEvent::Disconnected).await;
        });

        *self.outgoing.lock() = Some(out_tx);
        if let Some(previous) = self.reader.lock().replace(reader_task) {
            previous.abort();
        }

        let _ = self.inbox.send(TransportEvent::Connected).await;
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.outgoing.lock().clone().ok_or(TransportError::NotOpen)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("websocket writer stopped".to_string()))
    }

    async fn close(&self) {
        // Dropping the sender lets the writer flush and close the socket
        self.outgoing.lock().take();
        // The reader would otherwise wait for the server's close frame
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.events
            .lock()
            .take()
            .ok_or(TransportError::AlreadySubscribed)
    }
}

/// Creates a [`WsTransport`] per room membership.
#[derive(Clone, Debug)]
pub struct WsConnector {
    ws_url: String,
}

impl WsConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

impl TransportFactory for WsConnector {
    type Transport = WsTransport;

    fn create(&self) -> WsTransport {
        WsTransport::new(self.ws_url.clone())
    }
}
