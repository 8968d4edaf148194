use std::fmt;

use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

use crate::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Camera or microphone denied or unavailable. Fatal to joining.
    #[error("Media acquisition failed: {0}")]
    Media(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Signaling transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single peer's session was reported upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A description was rejected by the connection.
    Negotiation(String),
    ConnectionFailed,
    ConnectionClosed,
    /// Failed again within the retry window; no further automatic attempt.
    PersistentFailure,
    /// Passive side saw no offer within the negotiation timeout.
    NegotiationStalled,
    /// Outbound envelope could not be handed to the transport.
    Signaling(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Negotiation(e) => write!(f, "negotiation failed: {}", e),
            FailureReason::ConnectionFailed => write!(f, "connection failed"),
            FailureReason::ConnectionClosed => write!(f, "connection closed"),
            FailureReason::PersistentFailure => write!(f, "persistent failure, not retrying"),
            FailureReason::NegotiationStalled => write!(f, "no offer received"),
            FailureReason::Signaling(e) => write!(f, "signaling failed: {}", e),
        }
    }
}

/// Structured per-peer failure condition surfaced by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFailure {
    pub peer_id: PeerId,
    pub reason: FailureReason,
}

impl fmt::Display for PeerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer {}: {}", self.peer_id, self.reason)
    }
}
