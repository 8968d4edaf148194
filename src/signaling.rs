use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::connection::{IceCandidate, SessionDescription};
use crate::error::{Error, Result};
use crate::PeerId;

/// Payload relayed between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Offer { sdp: SessionDescription },
    Answer { sdp: SessionDescription },
    IceCandidate { ice: IceCandidate },
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice_candidate",
        }
    }
}

/// Messages the server sends to this client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinedRoom {
        #[serde(alias = "users")]
        members: Vec<PeerId>,
    },
    PeerJoined {
        #[serde(alias = "user_id")]
        peer_id: PeerId,
    },
    PeerLeft {
        #[serde(alias = "user_id")]
        peer_id: PeerId,
    },
    Signal {
        from: PeerId,
        signal: Signal,
    },
    Error {
        message: String,
    },
}

/// Messages this client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { room_id: String, peer_id: PeerId },
    Signal { to: PeerId, signal: Signal },
    Leave { room_id: String, peer_id: PeerId },
}

/// Outbound half of the signaling transport as seen by the lifecycle core.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send_signal(&self, to: &str, signal: Signal) -> Result<()>;
}

/// Clonable handle for sending client messages.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<ClientMessage>,
}

impl SignalSender {
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| Error::Signaling(format!("Failed to send message: {}", e)))
    }
}

#[async_trait]
impl SignalSink for SignalSender {
    async fn send_signal(&self, to: &str, signal: Signal) -> Result<()> {
        self.send(ClientMessage::Signal {
            to: to.to_string(),
            signal,
        })
        .await
    }
}

pub struct SignalingClient {
    sender: SignalSender,
    rx: mpsc::Receiver<ServerMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to signaling server {}", url);
        let (mut write, mut read) = ws_stream.split();

        let (tx, rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientMessage>(100);

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode signaling message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    warn!("Signaling write failed: {}", e);
                    break;
                }
            }
            if let Err(e) = write.close().await {
                debug!("Closing signaling connection failed: {}", e);
            }
            debug!("Signaling writer stopped");
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Signaling read failed: {}", e);
                        break;
                    }
                };
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed signaling message: {}", e),
                }
            }
            debug!("Signaling reader stopped");
        });

        Ok(Self {
            sender: SignalSender { tx: outgoing_tx },
            rx,
        })
    }

    pub fn sender(&self) -> SignalSender {
        self.sender.clone()
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.sender.send(msg).await
    }

    /// `None` once the server connection is gone.
    pub async fn receive(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Splits into the outbound handle and the inbound message stream.
    pub fn into_parts(self) -> (SignalSender, mpsc::Receiver<ServerMessage>) {
        (self.sender, self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_wire_format() {
        let msg = ClientMessage::Signal {
            to: "bob".to_string(),
            signal: Signal::Offer {
                sdp: SessionDescription::offer("v=0"),
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "message_type": "signal",
                "to": "bob",
                "signal": {"type": "offer", "sdp": {"type": "offer", "sdp": "v=0"}}
            })
        );
    }

    #[test]
    fn test_parse_candidate_signal() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "message_type": "signal",
            "from": "alice",
            "signal": {
                "type": "ice_candidate",
                "ice": {"candidate": "candidate:0 1 udp 1 1.2.3.4 5 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
            }
        }))
        .unwrap();

        match msg {
            ServerMessage::Signal { from, signal: Signal::IceCandidate { ice } } => {
                assert_eq!(from, "alice");
                assert_eq!(ice.sdp_mid.as_deref(), Some("0"));
                assert_eq!(ice.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_legacy_membership_field_names() {
        let joined: ServerMessage =
            serde_json::from_str(r#"{"message_type":"joined_room","users":["a","b"]}"#).unwrap();
        assert!(matches!(joined, ServerMessage::JoinedRoom { members } if members == ["a", "b"]));

        let left: ServerMessage =
            serde_json::from_str(r#"{"message_type":"peer_left","user_id":"b"}"#).unwrap();
        assert!(matches!(left, ServerMessage::PeerLeft { peer_id } if peer_id == "b"));
    }

    #[tokio::test]
    async fn test_sender_wraps_signal_for_peer() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = SignalSender { tx };
        sender
            .send_signal("carol", Signal::IceCandidate { ice: IceCandidate::new("c1") })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            ClientMessage::Signal { to, signal } => {
                assert_eq!(to, "carol");
                assert_eq!(signal.kind(), "ice_candidate");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_is_signaling_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = SignalSender { tx };
        let err = sender
            .send(ClientMessage::Leave {
                room_id: "r".to_string(),
                peer_id: "me".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Signaling(_)));
    }

    #[tokio::test]
    async fn test_writer_flushes_leave_then_closes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => received.push(text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            received
        });

        let client = SignalingClient::connect(&format!("ws://{}", addr)).await.unwrap();
        let (sender, _inbound) = client.into_parts();
        sender
            .send(ClientMessage::Leave {
                room_id: "lobby".to_string(),
                peer_id: "me".to_string(),
            })
            .await
            .unwrap();
        drop(sender);

        let received = server.await.unwrap();
        assert_eq!(received.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&received[0]).unwrap();
        assert_eq!(
            value,
            json!({"message_type": "leave", "room_id": "lobby", "peer_id": "me"})
        );
    }
}
