//! Snapshot gateway: best-effort durable copy of a room's text.
//!
//! Loads seed a fresh session; saves are fire-and-forget so the edit path
//! never waits on persistence.

use crate::error::{Result, SdkError};
use crate::rest::{DocUpdate, RestApi};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Stored text of a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
    /// Write time, when the store reports one.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            timestamp: Some(timestamp),
        }
    }
}

/// Reads and writes room snapshots through a [`RestApi`].
pub struct SnapshotGateway<R: RestApi> {
    rest: Arc<R>,
    failures: Arc<AtomicU64>,
}

impl<R: RestApi> Clone for SnapshotGateway<R> {
    fn clone(&self) -> Self {
        Self {
            rest: self.rest.clone(),
            failures: self.failures.clone(),
        }
    }
}

impl<R: RestApi> SnapshotGateway<R> {
    pub fn new(rest: Arc<R>) -> Self {
        Self {
            rest,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fetch the latest snapshot for `room`. `Ok(None)` if none was stored.
    pub async fn load(&self, room: &str) -> Result<Option<Snapshot>> {
        let snapshot = self
            .rest
            .get_doc(room)
            .await
            .map_err(|e| SdkError::PersistenceFailure(e.to_string()))?;
        debug!(room, found = snapshot.is_some(), "snapshot loaded");
        Ok(snapshot)
    }

    /// Store `text` in the background. Failures are logged and counted.
    pub fn save(&self, room: &str, text: String, timestamp: DateTime<Utc>) -> JoinHandle<()> {
        let rest = self.rest.clone();
        let failures = self.failures.clone();
        let update = DocUpdate {
            room: room.to_string(),
            content: text,
            timestamp,
        };

        tokio::spawn(async move {
            if let Err(e) = rest.post_update(&update).await {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(room = %update.room, error = %e, "snapshot save failed");
            }
        })
    }

    /// Number of saves that failed so far.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
