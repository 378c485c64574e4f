use std::sync::Arc;

use super::Request;
use crate::auth::HmacEngine;
use crate::event::{EventRecord, StatusEvent};
use crate::frame::Frame;
pub use crate::frame::EVENT_COUNT_OFFSET;
use crate::{ProtocolKind, REQUEST_BASE_SIZE, REQUEST_HEADER_SIZE, STATUS_EVENT_SIZE, TELEMETRY_EVENT_LIMIT};

pub const EVENTS_OFFSET: usize = REQUEST_HEADER_SIZE;

/// Batches up to 32 status events. Populated once the first event is added.
#[derive(Debug)]
pub struct TelemetryRequest {
    frame: Frame,
    event_count: usize,
}

impl TelemetryRequest {
    pub fn new(device_id: u32, hmac: Arc<HmacEngine>) -> Self {
        Self {
            frame: Frame::new(ProtocolKind::Telemetry, device_id, hmac),
            event_count: 0,
        }
    }

    #[inline]
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Room for another event and not locked by an exchange.
    pub fn can_accept(&self) -> bool {
        !self.frame.is_in_flight() && self.event_count < TELEMETRY_EVENT_LIMIT
    }

    pub fn add_status_event(&mut self, event: &StatusEvent) -> bool {
        self.add_record(&event.encode())
    }

    pub fn add_record(&mut self, record: &EventRecord) -> bool {
        if !self.can_accept() {
            return false;
        }
        let offset = EVENTS_OFFSET + self.event_count * STATUS_EVENT_SIZE;
        let buffer = self.frame.buffer_mut();
        buffer[offset..offset + STATUS_EVENT_SIZE].copy_from_slice(record);
        self.event_count += 1;
        buffer[EVENT_COUNT_OFFSET] = self.event_count as u8;
        self.frame.set_populated();
        true
    }

    /// Decodes the batched events in insertion order; unreadable slots are skipped.
    pub fn events(&self) -> impl Iterator<Item = StatusEvent> + '_ {
        let bytes = self.frame.bytes(EVENTS_OFFSET + self.event_count * STATUS_EVENT_SIZE);
        bytes[EVENTS_OFFSET..]
            .chunks_exact(STATUS_EVENT_SIZE)
            .filter_map(|rec| StatusEvent::decode(rec).ok())
    }
}

impl Request for TelemetryRequest {
    fn frame(&self) -> &Frame {
        &self.frame
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    fn size(&self) -> usize {
        REQUEST_BASE_SIZE + self.event_count * STATUS_EVENT_SIZE
    }

    fn reset(&mut self) {
        // frame first, while size() still covers the signed events
        let size = self.size();
        self.frame.clear(size, false);
        let end = EVENTS_OFFSET + self.event_count * STATUS_EVENT_SIZE;
        let buffer = self.frame.buffer_mut();
        buffer[EVENTS_OFFSET..end].fill(0);
        buffer[EVENT_COUNT_OFFSET] = 0;
        self.event_count = 0;
    }
}
