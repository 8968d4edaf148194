//! Fire-and-forget hooks into whatever renders the call.

use tracing::info;

use crate::media::{LocalStream, RemoteTrack};

pub trait RoomView: Send + Sync {
    fn attach_local_stream(&self, stream: &LocalStream);
    fn attach_remote_stream(&self, peer_id: &str, track: RemoteTrack);
    /// Must tolerate peers that never had a stream attached.
    fn detach_remote_stream(&self, peer_id: &str);
}

/// Headless view that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingView;

impl RoomView for TracingView {
    fn attach_local_stream(&self, stream: &LocalStream) {
        info!("Local stream {} ready ({} tracks)", stream.id, stream.tracks.len());
    }

    fn attach_remote_stream(&self, peer_id: &str, track: RemoteTrack) {
        info!("Remote {} track {} from {}", track.kind, track.id, peer_id);
    }

    fn detach_remote_stream(&self, peer_id: &str) {
        info!("Detached remote stream of {}", peer_id);
    }
}
