//! The underlying peer connection, seen only through the capabilities the
//! lifecycle core needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Result;
use crate::media::{LocalTrack, RemoteTrack};
use crate::PeerId;

/// Identifies one incarnation of a peer session. A reconnect gets a new id,
/// so notifications from a replaced connection can be told apart.
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// State reported by the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Failed and closed both end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "New"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Failed => write!(f, "Failed"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Asynchronous notifications a connection emits.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    StateChanged(ConnectionState),
}

/// A connection notification tagged with the session that produced it.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub peer_id: PeerId,
    pub session_id: SessionId,
    pub event: ConnectionEvent,
}

/// Handle given to a connection for emitting its notifications back to the
/// lifecycle manager's event loop.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    peer_id: PeerId,
    session_id: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(peer_id: PeerId, session_id: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            peer_id,
            session_id,
            tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn emit(&self, event: ConnectionEvent) {
        // The manager may already be gone during shutdown.
        if self
            .tx
            .send(SessionEvent {
                peer_id: self.peer_id.clone(),
                session_id: self.session_id,
                event,
            })
            .is_err()
        {
            trace!("Dropping event for {}: manager stopped", self.peer_id);
        }
    }
}

/// Capability set of the underlying peer connection.
///
/// Applying a remote offer must supersede any outstanding local offer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;
    /// Detaches every notification handler, then closes.
    async fn close(&self) -> Result<()>;
}

/// Creates one connection per session.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerConnection>>;
}
