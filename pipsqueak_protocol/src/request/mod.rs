// Requests: one long-lived instance per protocol, reused for every exchange.

mod reboot;
mod setpoint;
mod telemetry;
mod time;

use std::sync::Arc;

pub use reboot::{message_size_field, ReportRebootRequest, MESSAGE_OFFSET, MESSAGE_SIZE_OFFSET, NORMAL_REBOOT_MESSAGE};
pub use setpoint::{SetpointRequest, REBOOT_FLAG_OFFSET};
pub use telemetry::{TelemetryRequest, EVENTS_OFFSET, EVENT_COUNT_OFFSET};
pub use time::TimeRequest;

use crate::auth::HmacEngine;
use crate::frame::Frame;
use crate::response::Response;
use crate::ProtocolKind;

/// Lifecycle shared by every protocol. Implementors supply the frame, the
/// live size and how their own payload is purged; the rest is common.
pub trait Request {
    fn frame(&self) -> &Frame;
    fn frame_mut(&mut self) -> &mut Frame;

    /// Bytes that go on the wire, HMAC included.
    fn size(&self) -> usize;

    /// Back to idle. Clears the frame at the current size first, then drops
    /// variant payload, so the HMAC that gets zeroed is the one that was written.
    fn reset(&mut self);

    fn protocol(&self) -> ProtocolKind {
        self.frame().protocol()
    }

    fn is_populated(&self) -> bool {
        self.frame().is_populated()
    }

    fn is_in_flight(&self) -> bool {
        self.frame().is_in_flight()
    }

    /// Stamps `now` and `challenge`, signs, marks in flight.
    fn ready(&mut self, now: u32, challenge: u32) -> bool {
        let size = self.size();
        self.frame_mut().ready(size, now, challenge)
    }

    /// Undoes `ready` but keeps the payload for a retry.
    fn failed(&mut self) {
        let size = self.size();
        let populated = self.is_populated();
        self.frame_mut().clear(size, populated);
    }

    fn timestamp(&self) -> u32 {
        self.frame().timestamp()
    }

    fn as_bytes(&self) -> &[u8] {
        self.frame().bytes(self.size())
    }

    fn response(&self) -> &Response {
        self.frame().response()
    }

    fn response_mut(&mut self) -> &mut Response {
        self.frame_mut().response_mut()
    }
}

/// All four requests, allocated once at startup.
#[derive(Debug)]
pub struct RequestSet {
    pub time: TimeRequest,
    pub setpoint: SetpointRequest,
    pub telemetry: TelemetryRequest,
    pub reboot: ReportRebootRequest,
}

impl RequestSet {
    pub fn new(device_id: u32, hmac: Arc<HmacEngine>) -> Self {
        Self {
            time: TimeRequest::new(device_id, hmac.clone()),
            setpoint: SetpointRequest::new(device_id, hmac.clone()),
            telemetry: TelemetryRequest::new(device_id, hmac.clone()),
            reboot: ReportRebootRequest::new(device_id, hmac),
        }
    }

    pub fn get(&self, kind: ProtocolKind) -> &dyn Request {
        match kind {
            ProtocolKind::Time => &self.time,
            ProtocolKind::Setpoint => &self.setpoint,
            ProtocolKind::Telemetry => &self.telemetry,
            ProtocolKind::ReportReboot => &self.reboot,
        }
    }

    pub fn get_mut(&mut self, kind: ProtocolKind) -> &mut dyn Request {
        match kind {
            ProtocolKind::Time => &mut self.time,
            ProtocolKind::Setpoint => &mut self.setpoint,
            ProtocolKind::Telemetry => &mut self.telemetry,
            ProtocolKind::ReportReboot => &mut self.reboot,
        }
    }
}
