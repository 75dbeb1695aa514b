//! Client configuration.

use crate::error::RestError;
use reqwest::Url;
use std::time::Duration;

/// Default REST base, matching the room server's default bind.
pub const DEFAULT_API_URL: &str = "http://localhost:1234";
/// Default WebSocket base; the room code is appended as a path segment.
pub const DEFAULT_WS_URL: &str = "ws://localhost:1234/ws";

/// Configuration for a coedit client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API (snapshots and chat).
    pub api_url: String,
    /// Base URL of the WebSocket relay.
    pub ws_url: String,
    /// Timeout for a single REST request (in milliseconds).
    pub request_timeout_ms: u64,
    /// Capacity of the per-session command and event channels.
    pub channel_capacity: usize,
    /// How long a joining session holds a loaded snapshot while waiting for
    /// peers to send the room's live state (in milliseconds).
    pub sync_window_ms: u64,
    /// Pause between attempts to reopen a lost or never-opened room
    /// transport (in milliseconds).
    pub reconnect_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            request_timeout_ms: 5000,
            channel_capacity: 256,
            sync_window_ms: 250,
            reconnect_interval_ms: 500,
        }
    }
}

impl ClientConfig {
    /// Defaults, overridden by `COEDIT_API_URL` and `COEDIT_WS_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("COEDIT_API_URL") {
            config.api_url = url;
        }
        if let Ok(url) = std::env::var("COEDIT_WS_URL") {
            config.ws_url = url;
        }
        config
    }

    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sync_window(&self) -> Duration {
        Duration::from_millis(self.sync_window_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }

    /// Full URL for a REST route given as path segments, e.g.
    /// `["api", "doc", room]`.
    pub fn api_endpoint(&self, segments: &[&str]) -> Result<Url, RestError> {
        join_segments(&self.api_url, segments).map_err(RestError::InvalidUrl)
    }
}

/// `base` with `segments` appended to its path.
///
/// Each segment is percent-encoded on its own, so a room code containing
/// `/`, `?` or `#` stays one segment.
pub fn join_segments(base: &str, segments: &[&str]) -> Result<Url, String> {
    let mut url = Url::parse(base).map_err(|e| format!("{base}: {e}"))?;
    url.path_segments_mut()
        .map_err(|_| format!("{base}: cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Builder for client configuration.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = url.into();
        self
    }

    pub fn request_timeout(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    pub fn sync_window(mut self, ms: u64) -> Self {
        self.config.sync_window_ms = ms;
        self
    }

    pub fn reconnect_interval(mut self, ms: u64) -> Self {
        self.config.reconnect_interval_ms = ms;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
