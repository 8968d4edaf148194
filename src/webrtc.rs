use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::connection::{
    ConnectionEvent, ConnectionFactory, ConnectionState, IceCandidate, PeerConnection, SdpType,
    SessionDescription, SessionEvents,
};
use crate::error::{Error, Result};
use crate::media::{LocalTrack, MediaKind, RemoteTrack};

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::Negotiation(format!("unsupported description type {}", other))),
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let desc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(desc)
}

/// Builds webrtc-rs peer connections sharing one media engine setup.
pub struct RtcConnectionFactory {
    api: API,
    config: RTCConfiguration,
}

impl RtcConnectionFactory {
    pub fn new(ice_servers: &[String]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        Ok(Self { api, config })
    }
}

#[async_trait]
impl ConnectionFactory for RtcConnectionFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerConnection>> {
        let peer_connection = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);
        debug!(
            "Created peer connection for {} (session {})",
            events.peer_id(),
            events.session_id()
        );

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // None marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => events.emit(ConnectionEvent::LocalCandidate(init.into())),
                    Err(e) => warn!("Failed to serialize local candidate for {}: {}", events.peer_id(), e),
                }
            })
        }));

        let track_events = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    events.emit(ConnectionEvent::RemoteTrack(RemoteTrack {
                        id: track.id(),
                        stream_id: track.stream_id(),
                        kind: MediaKind::from(track.kind()),
                        handle: Some(track),
                    }));
                })
            },
        ));

        let state_events = events;
        peer_connection.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                debug!("Peer connection state of {} has changed: {}", events.peer_id(), s);
                events.emit(ConnectionEvent::StateChanged(s.into()));
            })
        }));

        Ok(Arc::new(RtcConnection { peer_connection }))
    }
}

pub struct RtcConnection {
    peer_connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp_type == SdpType::Offer
            && self.peer_connection.signaling_state() == RTCSignalingState::HaveLocalOffer
        {
            debug!("Rolling back local offer in favour of remote offer");
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            self.peer_connection.set_local_description(rollback).await?;
        }
        self.peer_connection.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.peer_connection
            .add_track(Arc::clone(&track.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        self.peer_connection.on_track(Box::new(
            |_: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                Box::pin(async {})
            },
        ));
        self.peer_connection
            .on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| Box::pin(async {})));
        self.peer_connection.close().await?;
        Ok(())
    }
}
