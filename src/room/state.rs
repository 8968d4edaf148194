use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

use crate::PeerId;

/// Who is in the room, as last reported by the signaling server.
#[derive(Debug, Clone)]
pub struct RoomState {
    local_id: PeerId,
    members: BTreeSet<PeerId>,
    joined: bool,
    /// Members we answer to, and since when we have waited for their offer.
    awaiting_offer: HashMap<PeerId, Instant>,
}

impl RoomState {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            members: BTreeSet::new(),
            joined: false,
            awaiting_offer: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Replaces the membership with the server's snapshot. Returns the
    /// remote members, self excluded.
    pub fn join(&mut self, members: impl IntoIterator<Item = PeerId>) -> Vec<PeerId> {
        self.joined = true;
        self.members = members
            .into_iter()
            .filter(|id| *id != self.local_id)
            .collect();
        self.members.iter().cloned().collect()
    }

    /// False for self and for peers already present.
    pub fn add_peer(&mut self, peer_id: &str) -> bool {
        if peer_id == self.local_id {
            return false;
        }
        self.members.insert(peer_id.to_string())
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        self.awaiting_offer.remove(peer_id);
        self.members.remove(peer_id)
    }

    pub fn is_member(&self, peer_id: &str) -> bool {
        self.members.contains(peer_id)
    }

    pub fn members(&self) -> Vec<PeerId> {
        self.members.iter().cloned().collect()
    }

    pub fn leave(&mut self) {
        self.joined = false;
        self.members.clear();
        self.awaiting_offer.clear();
    }

    /// Starts the offer wait for a member. An ongoing wait keeps its start.
    pub fn await_offer(&mut self, peer_id: &str, now: Instant) {
        if self.is_member(peer_id) {
            self.awaiting_offer.entry(peer_id.to_string()).or_insert(now);
        }
    }

    pub fn offer_received(&mut self, peer_id: &str) {
        self.awaiting_offer.remove(peer_id);
    }

    pub fn is_awaiting_offer(&self, peer_id: &str) -> bool {
        self.awaiting_offer.contains_key(peer_id)
    }

    /// Members whose offer is overdue, sorted. Each wait is reported once.
    pub fn take_stalled(&mut self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let mut stalled: Vec<PeerId> = self
            .awaiting_offer
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= timeout)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        for peer_id in &stalled {
            self.awaiting_offer.remove(peer_id);
        }
        stalled.sort();
        stalled
    }
}
