use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Reconnect,
    GiveUp,
}

/// Remembers the last failure per peer so a second failure inside the
/// window is surfaced instead of retried.
#[derive(Debug)]
pub struct RetryLedger {
    window: Duration,
    last_failure: HashMap<PeerId, Instant>,
}

impl RetryLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_failure: HashMap::new(),
        }
    }

    pub fn record_failure(&mut self, peer_id: &str, now: Instant) -> RetryDecision {
        match self.last_failure.get(peer_id) {
            Some(previous) if now.duration_since(*previous) < self.window => RetryDecision::GiveUp,
            _ => {
                self.last_failure.insert(peer_id.to_string(), now);
                RetryDecision::Reconnect
            }
        }
    }

    /// A successful connection breaks the failure streak.
    pub fn record_success(&mut self, peer_id: &str) {
        self.last_failure.remove(peer_id);
    }

    pub fn forget(&mut self, peer_id: &str) {
        self.last_failure.remove(peer_id);
    }

    pub fn clear(&mut self) {
        self.last_failure.clear();
    }
}
