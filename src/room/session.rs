use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::{ConnectionState, IceCandidate, PeerConnection, SessionId};
use crate::room::buffer::IceCandidateBuffer;
use crate::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Offering,
    AnsweringPending,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Idle, Offering) => true,
            (Idle | Offering, AnsweringPending) => true,
            (Offering | AnsweringPending, Connected) => true,
            // Remote renegotiation of a live connection.
            (Connected, AnsweringPending) => true,
            _ => false,
        }
    }

    /// Still waiting for the exchange to complete.
    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Offering | SessionState::AnsweringPending
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Offering => write!(f, "Offering"),
            SessionState::AnsweringPending => write!(f, "AnsweringPending"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Failed => write!(f, "Failed"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// One remote participant's connection and its negotiation state.
pub struct PeerSession {
    peer_id: PeerId,
    id: SessionId,
    connection: Arc<dyn PeerConnection>,
    state: SessionState,
    ice_buffer: IceCandidateBuffer,
    connection_state: ConnectionState,
}

impl PeerSession {
    pub fn new(peer_id: PeerId, id: SessionId, connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer_id,
            id,
            connection,
            state: SessionState::Idle,
            ice_buffer: IceCandidateBuffer::new(),
            connection_state: ConnectionState::New,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> Arc<dyn PeerConnection> {
        Arc::clone(&self.connection)
    }

    /// Applies a transition if the state machine allows it.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                "Session {} for {}: refusing transition {} -> {}",
                self.id, self.peer_id, self.state, next
            );
            return false;
        }
        debug!("Session {} for {}: {} -> {}", self.id, self.peer_id, self.state, next);
        self.state = next;
        true
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection_state = state;
    }

    pub fn has_remote_description(&self) -> bool {
        self.ice_buffer.is_released()
    }

    /// See [`IceCandidateBuffer::admit`].
    pub fn admit_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        self.ice_buffer.admit(candidate)
    }

    /// Marks the remote description applied and returns the backlog.
    pub fn release_candidates(&mut self) -> Vec<IceCandidate> {
        self.ice_buffer.release()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.ice_buffer.len()
    }

    /// Closes the connection and drops buffered candidates.
    pub async fn close(&mut self) {
        self.transition(SessionState::Closed);
        self.ice_buffer.clear();
        if let Err(e) = self.connection.close().await {
            warn!("Closing connection to {} failed: {}", self.peer_id, e);
        }
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("connection_state", &self.connection_state)
            .field("buffered", &self.ice_buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;

    #[test]
    fn test_offer_path() {
        assert!(Idle.can_transition_to(Offering));
        assert!(Offering.can_transition_to(Connected));
        assert!(!Idle.can_transition_to(Connected));
    }

    #[test]
    fn test_answer_path() {
        assert!(Idle.can_transition_to(AnsweringPending));
        assert!(AnsweringPending.can_transition_to(Connected));
        // A remote offer supersedes the local one.
        assert!(Offering.can_transition_to(AnsweringPending));
        assert!(!AnsweringPending.can_transition_to(Offering));
    }

    #[test]
    fn test_any_live_state_can_fail_or_close() {
        for state in [Idle, Offering, AnsweringPending, Connected] {
            assert!(state.can_transition_to(Failed));
            assert!(state.can_transition_to(Closed));
        }
        assert!(Failed.can_transition_to(Closed));
        assert!(!Failed.can_transition_to(Idle));
    }

    #[test]
    fn test_closed_is_terminal() {
        for state in [Idle, Offering, AnsweringPending, Connected, Failed] {
            assert!(!Closed.can_transition_to(state));
        }
    }

    #[test]
    fn test_negotiating_states() {
        assert!(Idle.is_negotiating());
        assert!(AnsweringPending.is_negotiating());
        assert!(!Connected.is_negotiating());
        assert!(!Failed.is_negotiating());
    }
}
