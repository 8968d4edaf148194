use std::collections::VecDeque;

use crate::connection::IceCandidate;

/// Holds remote candidates that arrive before a remote description.
///
/// Starts closed. [`release`](Self::release) hands back everything buffered
/// in arrival order and opens the gate, after which [`admit`](Self::admit)
/// passes candidates straight through.
#[derive(Debug, Default)]
pub struct IceCandidateBuffer {
    pending: VecDeque<IceCandidate>,
    released: bool,
}

impl IceCandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate if it may be applied now, otherwise keeps it.
    pub fn admit(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.released {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    /// Opens the gate and drains the backlog, oldest first. Draining twice
    /// yields nothing the second time.
    pub fn release(&mut self) -> Vec<IceCandidate> {
        self.released = true;
        self.pending.drain(..).collect()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{}", n))
    }

    #[test]
    fn test_buffers_until_released() {
        let mut buffer = IceCandidateBuffer::new();
        assert!(buffer.admit(candidate(1)).is_none());
        assert!(buffer.admit(candidate(2)).is_none());
        assert_eq!(buffer.len(), 2);
        assert!(!buffer.is_released());
    }

    #[test]
    fn test_release_is_fifo_and_exactly_once() {
        let mut buffer = IceCandidateBuffer::new();
        for n in 0..5 {
            buffer.admit(candidate(n));
        }

        let drained = buffer.release();
        let order: Vec<_> = drained.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(
            order,
            ["candidate:0", "candidate:1", "candidate:2", "candidate:3", "candidate:4"]
        );
        assert!(buffer.release().is_empty());
    }

    #[test]
    fn test_passes_through_after_release() {
        let mut buffer = IceCandidateBuffer::new();
        buffer.release();
        assert_eq!(buffer.admit(candidate(9)), Some(candidate(9)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_drops_backlog() {
        let mut buffer = IceCandidateBuffer::new();
        buffer.admit(candidate(1));
        buffer.clear();
        assert!(buffer.release().is_empty());
    }
}
