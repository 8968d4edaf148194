use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::room::session::SessionState;
use crate::PeerId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshStatus {
    pub joined: bool,
    pub members: Vec<PeerId>,
    pub sessions: BTreeMap<PeerId, SessionState>,
}

impl MeshStatus {
    pub fn connected(&self) -> usize {
        self.sessions
            .values()
            .filter(|state| **state == SessionState::Connected)
            .count()
    }
}

/// Publishes the latest mesh snapshot to any number of observers.
#[derive(Clone)]
pub struct MeshMonitor {
    status: Arc<watch::Sender<MeshStatus>>,
    receiver: watch::Receiver<MeshStatus>,
}

impl MeshMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(MeshStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    /// Observers are only woken when the snapshot actually changed.
    pub fn publish(&self, next: MeshStatus) {
        self.status.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    pub fn current(&self) -> MeshStatus {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MeshStatus> {
        self.receiver.clone()
    }
}

impl Default for MeshMonitor {
    fn default() -> Self {
        Self::new()
    }
}
