// Server client: a bounded queue of pending protocols and the session
// state machine that works through it.

pub mod session;

pub use session::Session;

use heapless::Deque;
use pipsqueak_protocol::ProtocolKind;
use tracing::debug;

pub const REQUEST_QUEUE_DEPTH: usize = 10;

/// FIFO of protocols waiting for a session. A protocol appears at most once,
/// and never while it is the one being exchanged.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: Deque<ProtocolKind, REQUEST_QUEUE_DEPTH>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ProtocolKind, active: Option<ProtocolKind>) -> bool {
        if active == Some(kind) || self.contains(kind) {
            return false;
        }
        if self.pending.push_back(kind).is_err() {
            debug!(event = "request_queue_full", protocol = %kind);
            return false;
        }
        true
    }

    pub fn pop(&mut self) -> Option<ProtocolKind> {
        self.pending.pop_front()
    }

    pub fn contains(&self, kind: ProtocolKind) -> bool {
        self.pending.iter().any(|k| *k == kind)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_without_duplicates() {
        let mut queue = RequestQueue::new();
        assert!(queue.push(ProtocolKind::Setpoint, None));
        assert!(queue.push(ProtocolKind::ReportReboot, None));
        assert!(!queue.push(ProtocolKind::Setpoint, None));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(ProtocolKind::Setpoint));
        assert_eq!(queue.pop(), Some(ProtocolKind::ReportReboot));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn active_protocol_is_not_queued_again() {
        let mut queue = RequestQueue::new();
        assert!(!queue.push(ProtocolKind::Telemetry, Some(ProtocolKind::Telemetry)));
        assert!(queue.push(ProtocolKind::Telemetry, Some(ProtocolKind::Time)));
        assert!(queue.contains(ProtocolKind::Telemetry));
    }
}
