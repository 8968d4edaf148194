//! Drives every peer session of one room membership.
//!
//! The manager is a single-task actor: server messages and connection
//! notifications are handled one at a time, so steps for one peer never
//! run in parallel. Any continuation that resumes after an `.await`
//! re-checks that its session is still the current incarnation before
//! acting; a replaced or removed session turns the rest of the step into
//! a no-op.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::MeshConfig;
use crate::connection::{
    ConnectionEvent, ConnectionFactory, ConnectionState, IceCandidate, SessionDescription,
    SessionEvent, SessionId,
};
use crate::error::{Error, FailureReason, PeerFailure, Result};
use crate::media::{LocalStream, MediaSource};
use crate::room::arbiter::{self, Role};
use crate::room::monitor::{MeshMonitor, MeshStatus};
use crate::room::registry::SessionRegistry;
use crate::room::retry::{RetryDecision, RetryLedger};
use crate::room::session::SessionState;
use crate::room::state::RoomState;
use crate::signaling::{ServerMessage, Signal, SignalSink};
use crate::view::RoomView;
use crate::PeerId;

const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const MAX_EARLY_SIGNALS: usize = 256;

pub struct LifecycleManager {
    room: RoomState,
    registry: SessionRegistry,
    retries: RetryLedger,
    media: Arc<dyn MediaSource>,
    local_stream: Option<LocalStream>,
    /// Signals that arrived before our own join, replayed once media exists.
    early_signals: Vec<(PeerId, Signal)>,
    view: Arc<dyn RoomView>,
    signals: Arc<dyn SignalSink>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    failures_tx: mpsc::UnboundedSender<PeerFailure>,
    monitor: MeshMonitor,
    negotiation_timeout: Duration,
}

impl LifecycleManager {
    /// Returns the manager and the stream of per-peer failures it reports.
    pub fn new(
        local_id: PeerId,
        config: &MeshConfig,
        factory: Arc<dyn ConnectionFactory>,
        media: Arc<dyn MediaSource>,
        view: Arc<dyn RoomView>,
        signals: Arc<dyn SignalSink>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerFailure>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        let manager = Self {
            room: RoomState::new(local_id),
            registry: SessionRegistry::new(factory, Arc::clone(&view), events_tx),
            retries: RetryLedger::new(config.retry_window()),
            media,
            local_stream: None,
            early_signals: Vec::new(),
            view,
            signals,
            events_rx,
            failures_tx,
            monitor: MeshMonitor::new(),
            negotiation_timeout: config.negotiation_timeout(),
        };
        (manager, failures_rx)
    }

    pub fn local_id(&self) -> &str {
        self.room.local_id()
    }

    pub fn room(&self) -> &RoomState {
        &self.room
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn has_local_stream(&self) -> bool {
        self.local_stream.is_some()
    }

    pub fn monitor(&self) -> MeshMonitor {
        self.monitor.clone()
    }

    /// Handles messages and connection notifications until `shutdown`
    /// resolves or the signaling transport closes, then leaves the room.
    pub async fn run<F>(mut self, mut inbound: mpsc::Receiver<ServerMessage>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stall_check = interval(STALL_CHECK_INTERVAL);
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.handle_server_message(msg).await {
                            error!("Cannot continue in room: {}", e);
                            break Err(e);
                        }
                    }
                    None => {
                        warn!("Signaling transport closed");
                        break Err(Error::Closed);
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_session_event(event).await;
                    self.publish_status();
                }
                _ = stall_check.tick() => self.check_stalls(Instant::now()),
            }
        };

        self.leave().await;
        result
    }

    /// Only a media acquisition failure while joining is returned; every
    /// per-peer problem is reported on the failure stream instead.
    pub async fn handle_server_message(&mut self, msg: ServerMessage) -> Result<()> {
        match msg {
            ServerMessage::JoinedRoom { members } => self.joined_room(members).await?,
            ServerMessage::PeerJoined { peer_id } => self.peer_joined(&peer_id).await,
            ServerMessage::PeerLeft { peer_id } => self.peer_left(&peer_id).await,
            ServerMessage::Signal { from, signal } => self.handle_signal(&from, signal).await,
            ServerMessage::Error { message } => warn!("Signaling server error: {}", message),
        }
        self.publish_status();
        Ok(())
    }

    /// Handles every connection notification already queued. Returns how
    /// many were handled.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_session_event(event).await;
            handled += 1;
        }
        self.publish_status();
        handled
    }

    pub async fn joined_room(&mut self, members: Vec<PeerId>) -> Result<()> {
        if self.local_stream.is_none() {
            let stream = self.media.acquire().await?;
            self.view.attach_local_stream(&stream);
            self.local_stream = Some(stream);
        }

        let others = self.room.join(members);
        info!("Joined room as {} with {} other member(s)", self.room.local_id(), others.len());
        // Joining a populated room is no different from each of them joining.
        for peer_id in others {
            self.arbitrate(&peer_id).await;
        }

        let early = std::mem::take(&mut self.early_signals);
        if !early.is_empty() {
            debug!("Replaying {} signal(s) received before joining", early.len());
        }
        for (from, signal) in early {
            self.handle_signal(&from, signal).await;
        }
        self.publish_status();
        Ok(())
    }

    pub async fn peer_joined(&mut self, peer_id: &str) {
        if peer_id == self.room.local_id() {
            return;
        }
        if !self.room.is_joined() {
            debug!("Ignoring join of {} before our own join", peer_id);
            return;
        }
        if self.room.add_peer(peer_id) {
            info!("Peer {} joined", peer_id);
            self.retries.forget(peer_id);
        }
        self.arbitrate(peer_id).await;
    }

    pub async fn peer_left(&mut self, peer_id: &str) {
        if self.room.remove_peer(peer_id) {
            info!("Peer {} left", peer_id);
        }
        self.retries.forget(peer_id);
        self.registry.remove(peer_id).await;
    }

    /// Releases local capture once, then closes every session.
    pub async fn leave(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            self.media.release(stream);
        }
        self.early_signals.clear();
        let closed = self.registry.clear().await;
        self.room.leave();
        self.retries.clear();
        if closed > 0 {
            info!("Left room, closed {} session(s)", closed);
        }
        self.publish_status();
    }

    async fn arbitrate(&mut self, peer_id: &str) {
        match arbiter::role(self.room.local_id(), peer_id) {
            Role::Initiator => self.connect_to_peer(peer_id, true).await,
            Role::Responder => {
                let answered = self
                    .registry
                    .get(peer_id)
                    .is_some_and(|session| session.has_remote_description());
                if !answered {
                    debug!("Waiting for offer from {}", peer_id);
                    self.room.await_offer(peer_id, Instant::now());
                }
            }
        }
    }

    /// Ensures a session exists and, with `offer`, starts negotiating from
    /// `Idle`. Sessions already negotiating or connected are left alone.
    pub async fn connect_to_peer(&mut self, peer_id: &str, offer: bool) {
        let created = self
            .registry
            .get_or_create(peer_id, self.local_stream.as_ref())
            .await
            .map(|session| (session.id(), session.state()));

        match created {
            Ok((session_id, SessionState::Idle)) if offer => self.send_offer(peer_id, session_id).await,
            Ok((_, state)) if offer => debug!("Not offering to {}: session is {}", peer_id, state),
            Ok(_) => {}
            Err(e) => {
                warn!("Cannot create connection for {}: {}", peer_id, e);
                self.report(peer_id, FailureReason::Negotiation(e.to_string()));
            }
        }
    }

    async fn send_offer(&mut self, peer_id: &str, session_id: SessionId) {
        let Some(session) = self.registry.current_mut(peer_id, session_id) else {
            return;
        };
        if !session.transition(SessionState::Offering) {
            return;
        }
        let connection = session.connection();

        let offer = async {
            let offer = connection.create_offer().await?;
            connection.set_local_description(offer.clone()).await?;
            Ok::<_, Error>(offer)
        }
        .await;

        let offer = match offer {
            Ok(offer) => offer,
            Err(e) => {
                self.fail_session(peer_id, session_id, FailureReason::Negotiation(e.to_string()))
                    .await;
                return;
            }
        };

        let still_offering = self
            .registry
            .current_mut(peer_id, session_id)
            .is_some_and(|session| session.state() == SessionState::Offering);
        if !still_offering {
            debug!("Discarding offer for superseded session {} of {}", session_id, peer_id);
            return;
        }

        info!("Sending offer to {}", peer_id);
        self.send(peer_id, Signal::Offer { sdp: offer }).await;
    }

    pub async fn handle_signal(&mut self, from: &str, signal: Signal) {
        if from == self.room.local_id() {
            warn!("Ignoring {} addressed from ourselves", signal.kind());
            return;
        }
        if !self.room.is_joined() {
            if self.early_signals.len() >= MAX_EARLY_SIGNALS {
                warn!("Dropping {} from {}: too many signals before join", signal.kind(), from);
            } else {
                debug!("Holding {} from {} until we have joined", signal.kind(), from);
                self.early_signals.push((from.to_string(), signal));
            }
            return;
        }
        match signal {
            Signal::Offer { sdp } => self.handle_offer(from, sdp).await,
            Signal::Answer { sdp } => self.handle_answer(from, sdp).await,
            Signal::IceCandidate { ice } => self.handle_candidate(from, ice).await,
        }
    }

    /// A remote offer always wins, even over our own outstanding offer.
    async fn handle_offer(&mut self, from: &str, sdp: SessionDescription) {
        let created = self
            .registry
            .get_or_create(from, self.local_stream.as_ref())
            .await
            .map(|session| {
                let accepted = session.transition(SessionState::AnsweringPending);
                (session.id(), accepted, session.connection())
            });

        let (session_id, connection) = match created {
            Ok((session_id, true, connection)) => (session_id, connection),
            Ok((session_id, false, _)) => {
                debug!("Dropping offer from {} for session {}", from, session_id);
                return;
            }
            Err(e) => {
                warn!("Cannot create connection for {}: {}", from, e);
                self.report(from, FailureReason::Negotiation(e.to_string()));
                return;
            }
        };

        self.room.offer_received(from);
        info!("Answering offer from {}", from);
        let answer = async {
            connection.set_remote_description(sdp).await?;
            let answer = connection.create_answer().await?;
            connection.set_local_description(answer.clone()).await?;
            Ok::<_, Error>(answer)
        }
        .await;

        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_session(from, session_id, FailureReason::Negotiation(e.to_string()))
                    .await;
                return;
            }
        };

        if !self.registry.is_current(from, session_id) {
            debug!("Discarding answer for superseded session {} of {}", session_id, from);
            return;
        }

        self.send(from, Signal::Answer { sdp: answer }).await;
        self.flush_candidates(from, session_id).await;
        self.settle_if_connected(from, session_id);
    }

    async fn handle_answer(&mut self, from: &str, sdp: SessionDescription) {
        let Some(session) = self.registry.get_mut(from) else {
            debug!("Ignoring answer from {}: no session", from);
            return;
        };
        if session.state() != SessionState::Offering {
            debug!("Ignoring answer from {}: session is {}", from, session.state());
            return;
        }
        let session_id = session.id();
        let connection = session.connection();

        if let Err(e) = connection.set_remote_description(sdp).await {
            self.fail_session(from, session_id, FailureReason::Negotiation(e.to_string()))
                .await;
            return;
        }

        if !self.registry.is_current(from, session_id) {
            debug!("Discarding answer result for superseded session {} of {}", session_id, from);
            return;
        }

        info!("Applied answer from {}", from);
        self.flush_candidates(from, session_id).await;
        self.settle_if_connected(from, session_id);
    }

    async fn handle_candidate(&mut self, from: &str, ice: IceCandidate) {
        let admitted = self
            .registry
            .get_or_create(from, self.local_stream.as_ref())
            .await
            .map(|session| {
                let ready = session.admit_candidate(ice);
                (ready, session.connection(), session.buffered_candidates())
            });

        match admitted {
            Ok((Some(candidate), connection, _)) => {
                if let Err(e) = connection.add_ice_candidate(candidate).await {
                    warn!("Failed to add candidate from {}: {}", from, e);
                }
            }
            Ok((None, _, pending)) => {
                debug!("Buffered candidate from {} ({} pending)", from, pending);
            }
            Err(e) => {
                warn!("Cannot create connection for {}: {}", from, e);
                self.report(from, FailureReason::Negotiation(e.to_string()));
            }
        }
    }

    /// Applies candidates that raced ahead of the remote description, in
    /// arrival order, exactly once.
    async fn flush_candidates(&mut self, peer_id: &str, session_id: SessionId) {
        let Some(session) = self.registry.current_mut(peer_id, session_id) else {
            return;
        };
        let pending = session.release_candidates();
        if pending.is_empty() {
            return;
        }
        let connection = session.connection();

        debug!("Applying {} buffered candidate(s) from {}", pending.len(), peer_id);
        for candidate in pending {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!("Failed to add buffered candidate from {}: {}", peer_id, e);
            }
        }
    }

    /// The connection may have reported connected before our side of the
    /// exchange finished.
    fn settle_if_connected(&mut self, peer_id: &str, session_id: SessionId) {
        let Some(session) = self.registry.current_mut(peer_id, session_id) else {
            return;
        };
        if session.connection_state() == ConnectionState::Connected
            && session.transition(SessionState::Connected)
        {
            info!("Connected to {}", peer_id);
            self.retries.record_success(peer_id);
        }
    }

    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        let SessionEvent {
            peer_id,
            session_id,
            event,
        } = event;

        if !self.registry.is_current(&peer_id, session_id) {
            debug!("Discarding event from stale session {} of {}", session_id, peer_id);
            return;
        }

        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                self.send(&peer_id, Signal::IceCandidate { ice: candidate }).await;
            }
            ConnectionEvent::RemoteTrack(track) => {
                debug!("Remote {} track from {}", track.kind, peer_id);
                self.view.attach_remote_stream(&peer_id, track);
            }
            ConnectionEvent::StateChanged(state) => {
                self.connection_state_changed(&peer_id, session_id, state).await;
            }
        }
    }

    async fn connection_state_changed(&mut self, peer_id: &str, session_id: SessionId, state: ConnectionState) {
        let Some(session) = self.registry.current_mut(peer_id, session_id) else {
            return;
        };
        session.set_connection_state(state);

        match state {
            ConnectionState::Connected => {
                if session.has_remote_description() && session.transition(SessionState::Connected) {
                    info!("Connected to {}", peer_id);
                    self.retries.record_success(peer_id);
                }
            }
            ConnectionState::Failed => {
                self.fail_session(peer_id, session_id, FailureReason::ConnectionFailed)
                    .await;
            }
            ConnectionState::Closed => {
                self.fail_session(peer_id, session_id, FailureReason::ConnectionClosed)
                    .await;
            }
            ConnectionState::Disconnected => info!("Connection to {} interrupted", peer_id),
            ConnectionState::New | ConnectionState::Connecting => {}
        }
    }

    /// Tears the session down and, if the peer is still in the room, makes
    /// at most one fresh attempt per retry window.
    fn fail_session<'a>(
        &'a mut self,
        peer_id: &'a str,
        session_id: SessionId,
        reason: FailureReason,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(session) = self.registry.current_mut(peer_id, session_id) else {
                debug!("Ignoring failure of stale session {} of {}", session_id, peer_id);
                return;
            };
            session.transition(SessionState::Failed);
            warn!("Session {} for {} failed: {}", session_id, peer_id, reason);
            self.report(peer_id, reason);
            self.registry.remove(peer_id).await;

            if !self.room.is_member(peer_id) {
                return;
            }

            match self.retries.record_failure(peer_id, Instant::now()) {
                RetryDecision::Reconnect => {
                    info!("Reconnecting to {}", peer_id);
                    let created = self
                        .registry
                        .upsert(peer_id, self.local_stream.as_ref())
                        .await
                        .map(|session| session.id());
                    match created {
                        Ok(new_id) => {
                            if arbiter::is_initiator(self.room.local_id(), peer_id) {
                                self.send_offer(peer_id, new_id).await;
                            } else {
                                self.room.await_offer(peer_id, Instant::now());
                            }
                        }
                        Err(e) => {
                            warn!("Cannot recreate connection for {}: {}", peer_id, e);
                            self.report(peer_id, FailureReason::Negotiation(e.to_string()));
                        }
                    }
                }
                RetryDecision::GiveUp => {
                    warn!("Giving up on {} after repeated failures", peer_id);
                    self.report(peer_id, FailureReason::PersistentFailure);
                }
            }
        })
    }

    /// Reports members we answer to whose offer has not arrived within the
    /// negotiation timeout. Each wait is reported once; no offer is sent,
    /// since that would reintroduce glare.
    pub fn check_stalls(&mut self, now: Instant) {
        let timeout = self.negotiation_timeout;
        for peer_id in self.room.take_stalled(now, timeout) {
            warn!("Still waiting for an offer from {} after {:?}", peer_id, timeout);
            self.report(&peer_id, FailureReason::NegotiationStalled);
        }
    }

    async fn send(&self, peer_id: &str, signal: Signal) {
        let kind = signal.kind();
        if let Err(e) = self.signals.send_signal(peer_id, signal).await {
            warn!("Failed to send {} to {}: {}", kind, peer_id, e);
            self.report(peer_id, FailureReason::Signaling(e.to_string()));
        }
    }

    fn report(&self, peer_id: &str, reason: FailureReason) {
        let failure = PeerFailure {
            peer_id: peer_id.to_string(),
            reason,
        };
        if self.failures_tx.send(failure).is_err() {
            debug!("No failure subscriber for {}", peer_id);
        }
    }

    fn publish_status(&self) {
        self.monitor.publish(MeshStatus {
            joined: self.room.is_joined(),
            members: self.room.members(),
            sessions: self.registry.states().into_iter().collect(),
        });
    }
}
