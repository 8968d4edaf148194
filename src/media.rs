//! Local capture capability and remote track descriptors.
//!
//! The capture pipeline itself (camera, microphone, encoders) lives outside
//! this crate and writes samples into the tracks handed out here.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::config::MediaConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for MediaKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// An outgoing track shared by every session.
#[derive(Clone)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    pub track: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: MediaKind) -> Self {
        let id = id.into();
        let codec = match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let track = Arc::new(TrackLocalStaticSample::new(codec, id.clone(), stream_id.into()));
        Self { id, kind, track }
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// The local capture, acquired once per room membership.
#[derive(Debug, Clone)]
pub struct LocalStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

/// A track that arrived from a remote peer.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    /// Present for real connections; absent for synthetic notifications.
    pub handle: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fails with [`Error::Media`] when capture is denied or unavailable.
    async fn acquire(&self) -> Result<LocalStream>;
    fn release(&self, stream: LocalStream);
}

/// Hands out fixed opus/VP8 sample tracks for an external capture pipeline
/// to write into.
pub struct StaticMediaSource {
    config: MediaConfig,
    stream_id: String,
}

impl StaticMediaSource {
    pub fn new(config: MediaConfig, stream_id: impl Into<String>) -> Self {
        Self {
            config,
            stream_id: stream_id.into(),
        }
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self) -> Result<LocalStream> {
        let mut tracks = Vec::new();
        if self.config.audio {
            tracks.push(LocalTrack::new("audio", self.stream_id.clone(), MediaKind::Audio));
        }
        if self.config.video {
            tracks.push(LocalTrack::new("video", self.stream_id.clone(), MediaKind::Video));
        }
        if tracks.is_empty() {
            return Err(Error::Media("no audio or video track requested".to_string()));
        }

        info!("Acquired local stream {} with {} track(s)", self.stream_id, tracks.len());
        Ok(LocalStream {
            id: self.stream_id.clone(),
            tracks,
        })
    }

    fn release(&self, stream: LocalStream) {
        info!("Released local stream {}", stream.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_requested_kinds() {
        let source = StaticMediaSource::new(MediaConfig { audio: true, video: false }, "me");
        let stream = source.acquire().await.unwrap();
        assert_eq!(stream.tracks.len(), 1);
        assert_eq!(stream.tracks[0].kind, MediaKind::Audio);
    }

    #[tokio::test]
    async fn test_acquire_nothing_is_media_error() {
        let source = StaticMediaSource::new(MediaConfig { audio: false, video: false }, "me");
        let err = source.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Media(_)));
    }
}
