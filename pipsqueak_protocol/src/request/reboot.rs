use std::sync::Arc;

use super::Request;
use crate::auth::HmacEngine;
use crate::frame::Frame;
pub use crate::frame::MESSAGE_SIZE_OFFSET;
use crate::{read_u32, write_u32, ProtocolKind, REBOOT_MESSAGE_LIMIT, REQUEST_BASE_SIZE, REQUEST_HEADER_SIZE};

pub const MESSAGE_OFFSET: usize = REQUEST_HEADER_SIZE;

pub const NORMAL_REBOOT_MESSAGE: &str = "n/a";

/// Reports why the device restarted. The message is NUL-terminated on the
/// wire and its length field counts the terminator.
#[derive(Debug)]
pub struct ReportRebootRequest {
    frame: Frame,
    message_size: usize,
}

impl ReportRebootRequest {
    pub fn new(device_id: u32, hmac: Arc<HmacEngine>) -> Self {
        Self {
            frame: Frame::new(ProtocolKind::ReportReboot, device_id, hmac),
            message_size: 0,
        }
    }

    pub fn report_normal_reboot(&mut self) -> bool {
        self.set_message(NORMAL_REBOOT_MESSAGE.as_bytes())
    }

    pub fn report_exceptional_reboot(&mut self, reason: &str) -> bool {
        self.set_message(reason.as_bytes())
    }

    /// The message as sent, without the terminator.
    pub fn message(&self) -> &[u8] {
        let end = MESSAGE_OFFSET + self.message_size.saturating_sub(1);
        &self.frame.bytes(self.size())[MESSAGE_OFFSET..end]
    }

    /// Replaces any earlier message. Refused while in flight.
    fn set_message(&mut self, message: &[u8]) -> bool {
        if self.frame.is_in_flight() {
            return false;
        }
        if self.message_size > 0 {
            self.reset();
        }
        let size = (message.len() + 1).min(REBOOT_MESSAGE_LIMIT);
        let text = size - 1;
        let buffer = self.frame.buffer_mut();
        buffer[MESSAGE_OFFSET..MESSAGE_OFFSET + text].copy_from_slice(&message[..text]);
        buffer[MESSAGE_OFFSET + text] = 0;
        write_u32(buffer, MESSAGE_SIZE_OFFSET, size as u32);
        self.message_size = size;
        self.frame.set_populated();
        true
    }
}

impl Request for ReportRebootRequest {
    fn frame(&self) -> &Frame {
        &self.frame
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    fn size(&self) -> usize {
        REQUEST_BASE_SIZE + self.message_size
    }

    fn reset(&mut self) {
        let size = self.size();
        self.frame.clear(size, false);
        let buffer = self.frame.buffer_mut();
        buffer[MESSAGE_OFFSET..MESSAGE_OFFSET + self.message_size].fill(0);
        write_u32(buffer, MESSAGE_SIZE_OFFSET, 0);
        self.message_size = 0;
    }
}

/// Reads the length field of a raw reboot request header.
pub fn message_size_field(header: &[u8]) -> u32 {
    read_u32(header, MESSAGE_SIZE_OFFSET)
}
