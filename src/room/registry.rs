use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionFactory, SessionEvent, SessionEvents, SessionId};
use crate::error::{Error, Result};
use crate::media::LocalStream;
use crate::room::session::{PeerSession, SessionState};
use crate::view::RoomView;
use crate::PeerId;

/// Single owner of every peer session; at most one per peer id.
///
/// Lookups and iteration snapshots never hold a borrow across a removal, so
/// callers can tear sessions down while walking [`peer_ids`](Self::peer_ids).
pub struct SessionRegistry {
    sessions: HashMap<PeerId, PeerSession>,
    factory: Arc<dyn ConnectionFactory>,
    view: Arc<dyn RoomView>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    next_session_id: SessionId,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        view: Arc<dyn RoomView>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            factory,
            view,
            events_tx,
            next_session_id: 1,
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerSession> {
        self.sessions.get_mut(peer_id)
    }

    /// The session for `peer_id`, but only if it is still incarnation
    /// `session_id`. Continuations resuming after an await use this.
    pub fn current_mut(&mut self, peer_id: &str, session_id: SessionId) -> Option<&mut PeerSession> {
        self.sessions
            .get_mut(peer_id)
            .filter(|session| session.id() == session_id)
    }

    pub fn is_current(&self, peer_id: &str, session_id: SessionId) -> bool {
        self.sessions
            .get(peer_id)
            .is_some_and(|session| session.id() == session_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of the current keys, sorted.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn states(&self) -> Vec<(PeerId, SessionState)> {
        let mut states: Vec<_> = self
            .sessions
            .iter()
            .map(|(id, session)| (id.clone(), session.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Returns the existing session, or creates one with the local tracks
    /// attached.
    pub async fn get_or_create(
        &mut self,
        peer_id: &str,
        local: Option<&LocalStream>,
    ) -> Result<&mut PeerSession> {
        if !self.sessions.contains_key(peer_id) {
            return self.upsert(peer_id, local).await;
        }
        self.sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::Negotiation(format!("session for {} vanished", peer_id)))
    }

    /// Creates a fresh `Idle` session, first closing and detaching any
    /// previous one for the same peer.
    pub async fn upsert(&mut self, peer_id: &str, local: Option<&LocalStream>) -> Result<&mut PeerSession> {
        if let Some(mut previous) = self.sessions.remove(peer_id) {
            info!("Replacing session {} for {}", previous.id(), peer_id);
            previous.close().await;
            self.view.detach_remote_stream(peer_id);
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let events = SessionEvents::new(peer_id.to_string(), session_id, self.events_tx.clone());
        let connection = self.factory.create(events).await?;

        if let Some(stream) = local {
            for track in &stream.tracks {
                if let Err(e) = connection.add_track(track).await {
                    warn!("Failed to add {} track to connection for {}: {}", track.kind, peer_id, e);
                }
            }
        }

        debug!("Created session {} for {}", session_id, peer_id);
        let session = PeerSession::new(peer_id.to_string(), session_id, connection);
        Ok(self.sessions.entry(peer_id.to_string()).or_insert(session))
    }

    /// Closes and forgets the session and releases the peer's remote media.
    /// Returns false if there was nothing to remove.
    pub async fn remove(&mut self, peer_id: &str) -> bool {
        let Some(mut session) = self.sessions.remove(peer_id) else {
            return false;
        };
        info!("Removing session {} for {}", session.id(), peer_id);
        session.close().await;
        self.view.detach_remote_stream(peer_id);
        true
    }

    /// Removes every session. Returns how many were closed.
    pub async fn clear(&mut self) -> usize {
        let mut closed = 0;
        for peer_id in self.peer_ids() {
            if self.remove(&peer_id).await {
                closed += 1;
            }
        }
        closed
    }
}
