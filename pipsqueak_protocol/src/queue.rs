// Fixed-capacity circular queue of encoded status events.
// Newest data wins: when full, the oldest record is overwritten.

use crate::event::{EventRecord, StatusEvent};
use crate::STATUS_EVENT_SIZE;

pub const STATUS_EVENT_QUEUE_DEPTH: usize = 1024;

pub type StatusEventQueue = EventRing<STATUS_EVENT_QUEUE_DEPTH>;

/// Result of inserting into the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Accepted,
    /// The oldest record was dropped to make room.
    Overwrote,
}

/// Only `cursor` (read position) and `depth` move; the write slot is derived.
#[derive(Debug, Clone)]
pub struct EventRing<const N: usize> {
    slots: [EventRecord; N],
    cursor: usize,
    depth: usize,
}

impl<const N: usize> Default for EventRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventRing<N> {
    pub fn new() -> Self {
        Self {
            slots: [[0u8; STATUS_EVENT_SIZE]; N],
            cursor: 0,
            depth: 0,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn has_events(&self) -> bool {
        self.depth > 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.depth == N
    }

    pub fn enqueue(&mut self, event: &StatusEvent) -> InsertResult {
        self.enqueue_record(event.encode())
    }

    pub fn enqueue_record(&mut self, record: EventRecord) -> InsertResult {
        let head = (self.cursor + self.depth) % N;
        self.slots[head] = record;
        if self.depth == N {
            // head == cursor here: the oldest slot was just overwritten
            self.advance();
            InsertResult::Overwrote
        } else {
            self.depth += 1;
            InsertResult::Accepted
        }
    }

    pub fn dequeue(&mut self) -> Option<EventRecord> {
        if self.depth == 0 {
            return None;
        }
        let record = self.slots[self.cursor];
        self.advance();
        self.depth -= 1;
        Some(record)
    }

    /// Oldest first, without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> + '_ {
        (0..self.depth).map(move |i| &self.slots[(self.cursor + i) % N])
    }

    pub fn clear(&mut self) {
        self.cursor = 0;
        self.depth = 0;
    }

    #[inline]
    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % N;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn temp(ts: u32) -> StatusEvent {
        StatusEvent::TemperatureObservation { timestamp: ts, temperature: ts as f32 / 16.0 }
    }

    fn ts_of(rec: EventRecord) -> u32 {
        StatusEvent::decode(&rec).unwrap().timestamp()
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let mut q: EventRing<4> = EventRing::new();
        assert!(!q.has_events());
        assert_eq!(q.dequeue(), None);
        assert_eq!(q.depth(), 0);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = StatusEventQueue::new();
        for ts in 1..=STATUS_EVENT_QUEUE_DEPTH as u32 {
            assert_eq!(q.enqueue(&temp(ts)), InsertResult::Accepted);
        }
        assert!(q.is_full());
        assert_eq!(q.enqueue(&temp(1025)), InsertResult::Overwrote);
        assert_eq!(q.depth(), STATUS_EVENT_QUEUE_DEPTH);

        // first event is gone; the rest come back in order
        let mut expected = 2u32;
        while let Some(rec) = q.dequeue() {
            assert_eq!(ts_of(rec), expected);
            expected += 1;
        }
        assert_eq!(expected, 1026);
    }

    #[test]
    fn wraps_cleanly_after_partial_drain() {
        let mut q: EventRing<3> = EventRing::new();
        q.enqueue(&temp(1));
        q.enqueue(&temp(2));
        assert_eq!(q.dequeue().map(ts_of), Some(1));
        q.enqueue(&temp(3));
        q.enqueue(&temp(4));
        assert!(q.is_full());
        let peeked: Vec<u32> = q.iter().copied().map(ts_of).collect();
        assert_eq!(peeked, vec![2, 3, 4]);
        let drained: Vec<u32> = std::iter::from_fn(|| q.dequeue()).map(ts_of).collect();
        assert_eq!(drained, vec![2, 3, 4]);
    }

    proptest! {
        #[test]
        fn survivors_keep_fifo_order(count in 0usize..40) {
            let mut q: EventRing<16> = EventRing::new();
            for ts in 0..count as u32 {
                q.enqueue(&temp(ts));
            }
            prop_assert_eq!(q.depth(), count.min(16));
            let first = count.saturating_sub(16) as u32;
            let drained: Vec<u32> = std::iter::from_fn(|| q.dequeue()).map(ts_of).collect();
            let expected: Vec<u32> = (first..count as u32).collect();
            prop_assert_eq!(drained, expected);
        }
    }
}
