//! Client configuration.
//!
//! Loaded from an optional TOML file; command-line flags override it.
//!
//! ```toml
//! signaling_url = "wss://signal.example.org/ws"
//! room_id = "standup"
//! ice_servers = ["stun:stun.l.google.com:19302"]
//! retry_window_secs = 10
//!
//! [media]
//! audio = true
//! video = false
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub signaling_url: String,
    pub room_id: String,
    /// Random `user-<n>` when unset.
    pub peer_id: Option<String>,
    pub ice_servers: Vec<String>,
    pub media: MediaConfig,
    /// Two failures for the same peer closer than this are not retried.
    pub retry_window_secs: u64,
    /// How long the passive side waits for an offer before reporting a stall.
    pub negotiation_timeout_secs: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8080".to_string(),
            room_id: "lobby".to_string(),
            peer_id: None,
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            media: MediaConfig::default(),
            retry_window_secs: 10,
            negotiation_timeout_secs: 15,
        }
    }
}

impl MeshConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: MeshConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            bail!("room_id must not be empty");
        }
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            bail!(
                "signaling_url must be a ws:// or wss:// URL, got '{}'",
                self.signaling_url
            );
        }
        for url in &self.ice_servers {
            if !["stun:", "turn:", "turns:"].iter().any(|scheme| url.starts_with(scheme)) {
                bail!("ICE server '{}' must use stun:, turn: or turns:", url);
            }
        }
        if !self.media.audio && !self.media.video {
            bail!("at least one of media.audio or media.video must be enabled");
        }
        if let Some(peer_id) = &self.peer_id {
            if peer_id.trim().is_empty() {
                bail!("peer_id must not be empty when set");
            }
        }
        Ok(())
    }

    pub fn resolve_peer_id(&self) -> String {
        self.peer_id
            .clone()
            .unwrap_or_else(|| format!("user-{}", rand::random::<u32>()))
    }

    pub fn retry_window(&self) -> Duration {
        Duration::from_secs(self.retry_window_secs)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }
}
