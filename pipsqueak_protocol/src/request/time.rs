use std::sync::Arc;

use super::Request;
use crate::auth::HmacEngine;
use crate::frame::Frame;
use crate::{ProtocolKind, REQUEST_BASE_SIZE};

pub const TIME_REQUEST_SIZE: usize = REQUEST_BASE_SIZE;

/// Header only; used to pull the server's clock.
#[derive(Debug)]
pub struct TimeRequest {
    frame: Frame,
}

impl TimeRequest {
    pub fn new(device_id: u32, hmac: Arc<HmacEngine>) -> Self {
        let mut frame = Frame::new(ProtocolKind::Time, device_id, hmac);
        frame.set_populated();
        Self { frame }
    }
}

impl Request for TimeRequest {
    fn frame(&self) -> &Frame {
        &self.frame
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    fn size(&self) -> usize {
        TIME_REQUEST_SIZE
    }

    fn reset(&mut self) {
        self.frame.clear(TIME_REQUEST_SIZE, true);
    }
}
