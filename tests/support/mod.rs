#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use webrtc_mesh::config::MeshConfig;
use webrtc_mesh::connection::{
    ConnectionEvent, ConnectionFactory, ConnectionState, IceCandidate, PeerConnection, SdpType,
    SessionDescription, SessionEvents, SessionId,
};
use webrtc_mesh::media::{LocalStream, LocalTrack, MediaKind, MediaSource, RemoteTrack};
use webrtc_mesh::room::LifecycleManager;
use webrtc_mesh::signaling::{Signal, SignalSink};
use webrtc_mesh::view::RoomView;
use webrtc_mesh::{Error, PeerFailure, PeerId, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    AddTrack(String),
    Close,
}

pub struct FakeConnection {
    pub peer_id: PeerId,
    pub session_id: SessionId,
    ops: Mutex<Vec<Op>>,
    reject_remote: bool,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(Op::CreateOffer);
        Ok(SessionDescription::offer(format!(
            "offer-to-{}-{}",
            self.peer_id, self.session_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Op::CreateAnswer);
        Ok(SessionDescription::answer(format!(
            "answer-to-{}-{}",
            self.peer_id, self.session_id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(Op::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(Op::SetRemote(desc.sdp_type));
        if self.reject_remote {
            return Err(Error::Negotiation("remote description rejected".to_string()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Op::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(Op::AddTrack(track.id.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Op::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Created {
    events: SessionEvents,
    connection: Arc<FakeConnection>,
}

#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Created>>,
    reject_remote: Mutex<HashSet<PeerId>>,
}

impl FakeFactory {
    /// Connections created for `peer_id` from now on reject remote descriptions.
    pub fn reject_remote_for(&self, peer_id: &str) {
        self.reject_remote.lock().unwrap().insert(peer_id.to_string());
    }

    pub fn connections(&self, peer_id: &str) -> Vec<Arc<FakeConnection>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.connection.peer_id == peer_id)
            .map(|c| Arc::clone(&c.connection))
            .collect()
    }

    pub fn latest(&self, peer_id: &str) -> Arc<FakeConnection> {
        self.connections(peer_id)
            .pop()
            .unwrap_or_else(|| panic!("no connection created for {}", peer_id))
    }

    pub fn events(&self, peer_id: &str) -> SessionEvents {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.connection.peer_id == peer_id)
            .map(|c| c.events.clone())
            .unwrap_or_else(|| panic!("no connection created for {}", peer_id))
    }

    pub fn emit(&self, peer_id: &str, event: ConnectionEvent) {
        self.events(peer_id).emit(event);
    }

    pub fn emit_state(&self, peer_id: &str, state: ConnectionState) {
        self.emit(peer_id, ConnectionEvent::StateChanged(state));
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerConnection>> {
        let reject_remote = self.reject_remote.lock().unwrap().contains(events.peer_id());
        let connection = Arc::new(FakeConnection {
            peer_id: events.peer_id().to_string(),
            session_id: events.session_id(),
            ops: Mutex::new(Vec::new()),
            reject_remote,
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(Created {
            events,
            connection: Arc::clone(&connection),
        });
        Ok(connection)
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub deny: AtomicBool,
}

impl FakeMedia {
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self) -> Result<LocalStream> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::Media("permission denied".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalStream {
            id: "local".to_string(),
            tracks: vec![
                LocalTrack::new("audio", "local", MediaKind::Audio),
                LocalTrack::new("video", "local", MediaKind::Video),
            ],
        })
    }

    fn release(&self, _stream: LocalStream) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingView {
    pub local_attached: AtomicUsize,
    pub remote: Mutex<Vec<(PeerId, String)>>,
    pub detached: Mutex<Vec<PeerId>>,
}

impl RecordingView {
    pub fn detached(&self) -> Vec<PeerId> {
        self.detached.lock().unwrap().clone()
    }

    pub fn remote(&self) -> Vec<(PeerId, String)> {
        self.remote.lock().unwrap().clone()
    }
}

impl RoomView for RecordingView {
    fn attach_local_stream(&self, _stream: &LocalStream) {
        self.local_attached.fetch_add(1, Ordering::SeqCst);
    }

    fn attach_remote_stream(&self, peer_id: &str, track: RemoteTrack) {
        self.remote.lock().unwrap().push((peer_id.to_string(), track.id));
    }

    fn detach_remote_stream(&self, peer_id: &str) {
        self.detached.lock().unwrap().push(peer_id.to_string());
    }
}

#[derive(Default)]
pub struct RecordingSignals {
    sent: Mutex<Vec<(PeerId, Signal)>>,
    pub fail: AtomicBool,
}

impl RecordingSignals {
    pub fn sent(&self) -> Vec<(PeerId, Signal)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, peer_id: &str) -> Vec<Signal> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == peer_id)
            .map(|(_, signal)| signal)
            .collect()
    }

    pub fn kinds_to(&self, peer_id: &str) -> Vec<&'static str> {
        self.sent_to(peer_id).iter().map(|s| s.kind()).collect()
    }
}

#[async_trait]
impl SignalSink for RecordingSignals {
    async fn send_signal(&self, to: &str, signal: Signal) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Signaling("transport unavailable".to_string()));
        }
        self.sent.lock().unwrap().push((to.to_string(), signal));
        Ok(())
    }
}

pub struct Harness {
    pub manager: LifecycleManager,
    pub failures: mpsc::UnboundedReceiver<PeerFailure>,
    pub factory: Arc<FakeFactory>,
    pub media: Arc<FakeMedia>,
    pub view: Arc<RecordingView>,
    pub signals: Arc<RecordingSignals>,
}

impl Harness {
    pub fn new(local_id: &str) -> Self {
        Self::with_config(local_id, &MeshConfig::default())
    }

    pub fn with_config(local_id: &str, config: &MeshConfig) -> Self {
        let factory = Arc::new(FakeFactory::default());
        let media = Arc::new(FakeMedia::default());
        let view = Arc::new(RecordingView::default());
        let signals = Arc::new(RecordingSignals::default());

        let (manager, failures) = LifecycleManager::new(
            local_id.to_string(),
            config,
            factory.clone(),
            media.clone(),
            view.clone(),
            signals.clone(),
        );

        Self {
            manager,
            failures,
            factory,
            media,
            view,
            signals,
        }
    }

    pub async fn join(&mut self, members: &[&str]) {
        self.manager
            .joined_room(members.iter().map(|m| m.to_string()).collect())
            .await
            .unwrap();
    }

    pub fn failures(&mut self) -> Vec<PeerFailure> {
        let mut failures = Vec::new();
        while let Ok(failure) = self.failures.try_recv() {
            failures.push(failure);
        }
        failures
    }
}

pub fn offer(sdp: &str) -> Signal {
    Signal::Offer {
        sdp: SessionDescription::offer(sdp),
    }
}

pub fn answer(sdp: &str) -> Signal {
    Signal::Answer {
        sdp: SessionDescription::answer(sdp),
    }
}

pub fn candidate(c: &str) -> Signal {
    Signal::IceCandidate {
        ice: IceCandidate::new(c),
    }
}
