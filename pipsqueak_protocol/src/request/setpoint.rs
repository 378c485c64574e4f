use std::sync::Arc;

use super::Request;
use crate::auth::HmacEngine;
use crate::frame::Frame;
use crate::{ProtocolKind, REQUEST_BASE_SIZE};

pub const SETPOINT_REQUEST_SIZE: usize = REQUEST_BASE_SIZE;
pub const REBOOT_FLAG_OFFSET: usize = 9;

/// Asks the server for the current setpoint. The first one after boot carries
/// the reboot flag so the server can replay state.
#[derive(Debug)]
pub struct SetpointRequest {
    frame: Frame,
}

impl SetpointRequest {
    pub fn new(device_id: u32, hmac: Arc<HmacEngine>) -> Self {
        let mut frame = Frame::new(ProtocolKind::Setpoint, device_id, hmac);
        frame.set_populated();
        Self { frame }
    }

    /// Ignored while in flight.
    pub fn set_reboot(&mut self) -> bool {
        if self.frame.is_in_flight() {
            return false;
        }
        self.frame.buffer_mut()[REBOOT_FLAG_OFFSET] = 0x01;
        true
    }

    pub fn is_reboot(&self) -> bool {
        self.frame.bytes(SETPOINT_REQUEST_SIZE)[REBOOT_FLAG_OFFSET] != 0
    }
}

impl Request for SetpointRequest {
    fn frame(&self) -> &Frame {
        &self.frame
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    fn size(&self) -> usize {
        SETPOINT_REQUEST_SIZE
    }

    fn reset(&mut self) {
        self.frame.clear(SETPOINT_REQUEST_SIZE, true);
        self.frame.buffer_mut()[REBOOT_FLAG_OFFSET] = 0;
    }
}
