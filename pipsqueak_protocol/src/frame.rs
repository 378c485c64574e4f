// Request frame shared by all protocols.
//
//  0      protocol id
//  1..5   device id (u32)
//  5..9   timestamp (u32, unix seconds)
//  9      protocol specific (setpoint reboot flag, telemetry event count)
//  10..14 challenge (u32)
//  14..32 protocol specific
//  32..   payload, then a 32-byte HMAC over everything before it

use std::sync::Arc;

use crate::auth::HmacEngine;
use crate::error::{ProtocolError, Result};
use crate::response::Response;
use crate::{
    read_u32, write_u32, ProtocolKind, HMAC_SIZE, MAX_REQUEST_SIZE, REBOOT_MESSAGE_LIMIT,
    REQUEST_BASE_SIZE, REQUEST_HEADER_SIZE, STATUS_EVENT_SIZE, TELEMETRY_EVENT_LIMIT,
};

pub const PROTOCOL_ID_OFFSET: usize = 0;
pub const DEVICE_ID_OFFSET: usize = 1;
pub const TIMESTAMP_OFFSET: usize = 5;
pub const CHALLENGE_OFFSET: usize = 10;
pub const EVENT_COUNT_OFFSET: usize = 9;
pub const MESSAGE_SIZE_OFFSET: usize = 14;

/// Owned, fixed buffer plus lifecycle flags and the paired response.
/// Each request variant wraps one and decides how many bytes are live.
pub struct Frame {
    protocol: ProtocolKind,
    buffer: [u8; MAX_REQUEST_SIZE],
    populated: bool,
    in_flight: bool,
    hmac: Arc<HmacEngine>,
    response: Response,
}

impl Frame {
    pub fn new(protocol: ProtocolKind, device_id: u32, hmac: Arc<HmacEngine>) -> Self {
        let mut buffer = [0u8; MAX_REQUEST_SIZE];
        buffer[PROTOCOL_ID_OFFSET] = protocol.id();
        write_u32(&mut buffer, DEVICE_ID_OFFSET, device_id);
        Self {
            protocol,
            buffer,
            populated: false,
            in_flight: false,
            response: Response::new(protocol, hmac.clone()),
            hmac,
        }
    }

    #[inline]
    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    #[inline]
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn device_id(&self) -> u32 {
        read_u32(&self.buffer, DEVICE_ID_OFFSET)
    }

    pub fn timestamp(&self) -> u32 {
        read_u32(&self.buffer, TIMESTAMP_OFFSET)
    }

    pub fn challenge(&self) -> u32 {
        read_u32(&self.buffer, CHALLENGE_OFFSET)
    }

    #[inline]
    pub fn bytes(&self, size: usize) -> &[u8] {
        &self.buffer[..size]
    }

    #[inline]
    pub(crate) fn buffer_mut(&mut self) -> &mut [u8; MAX_REQUEST_SIZE] {
        &mut self.buffer
    }

    #[inline]
    pub(crate) fn set_populated(&mut self) {
        self.populated = true;
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Stamps, signs and arms the response. Refuses (touching nothing) when
    /// there is nothing to send or an exchange is already under way.
    pub fn ready(&mut self, size: usize, now: u32, challenge: u32) -> bool {
        if !self.populated || self.in_flight {
            return false;
        }
        self.in_flight = true;
        self.response.reset();
        self.response.set_challenge(challenge);
        write_u32(&mut self.buffer, CHALLENGE_OFFSET, challenge);
        write_u32(&mut self.buffer, TIMESTAMP_OFFSET, now);
        let hmac_offset = size - HMAC_SIZE;
        let tag = self.hmac.generate(&self.buffer[..hmac_offset]);
        self.buffer[hmac_offset..size].copy_from_slice(&tag);
        true
    }

    /// Zeroes timestamp, challenge and the HMAC at `size`, resets the response.
    /// `size` must still describe the payload that was signed.
    pub fn clear(&mut self, size: usize, populated: bool) {
        write_u32(&mut self.buffer, TIMESTAMP_OFFSET, 0);
        write_u32(&mut self.buffer, CHALLENGE_OFFSET, 0);
        self.buffer[size - HMAC_SIZE..size].fill(0);
        self.response.reset();
        self.in_flight = false;
        self.populated = populated;
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("protocol", &self.protocol)
            .field("device_id", &self.device_id())
            .field("populated", &self.populated)
            .field("in_flight", &self.in_flight)
            .field("response", &self.response)
            .finish()
    }
}

// ============================ Server side ===================================

/// Fields every request header carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub protocol: ProtocolKind,
    pub device_id: u32,
    pub timestamp: u32,
    pub challenge: u32,
    /// Full request length, HMAC included, as announced by the header.
    pub size: usize,
}

impl RequestHeader {
    pub fn parse(header: &[u8]) -> Result<Self> {
        if header.len() < REQUEST_HEADER_SIZE {
            return Err(ProtocolError::ShortBuffer { expected: REQUEST_HEADER_SIZE, actual: header.len() });
        }
        let protocol = ProtocolKind::try_from(header[PROTOCOL_ID_OFFSET])?;
        let size = match protocol {
            ProtocolKind::Time | ProtocolKind::Setpoint => REQUEST_BASE_SIZE,
            ProtocolKind::Telemetry => {
                let count = header[EVENT_COUNT_OFFSET] as usize;
                if count > TELEMETRY_EVENT_LIMIT {
                    return Err(ProtocolError::Oversized { size: count, limit: TELEMETRY_EVENT_LIMIT });
                }
                REQUEST_BASE_SIZE + count * STATUS_EVENT_SIZE
            }
            ProtocolKind::ReportReboot => {
                let len = read_u32(header, MESSAGE_SIZE_OFFSET) as usize;
                if len > REBOOT_MESSAGE_LIMIT {
                    return Err(ProtocolError::Oversized { size: len, limit: REBOOT_MESSAGE_LIMIT });
                }
                REQUEST_BASE_SIZE + len
            }
        };
        Ok(Self {
            protocol,
            device_id: read_u32(header, DEVICE_ID_OFFSET),
            timestamp: read_u32(header, TIMESTAMP_OFFSET),
            challenge: read_u32(header, CHALLENGE_OFFSET),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(protocol: u8) -> [u8; REQUEST_HEADER_SIZE] {
        let mut h = [0u8; REQUEST_HEADER_SIZE];
        h[PROTOCOL_ID_OFFSET] = protocol;
        write_u32(&mut h, DEVICE_ID_OFFSET, 127);
        write_u32(&mut h, TIMESTAMP_OFFSET, 1000);
        write_u32(&mut h, CHALLENGE_OFFSET, 77);
        h
    }

    #[test]
    fn announced_sizes() {
        assert_eq!(RequestHeader::parse(&header(0)).unwrap().size, 64);
        assert_eq!(RequestHeader::parse(&header(1)).unwrap().size, 64);

        let mut t = header(2);
        t[EVENT_COUNT_OFFSET] = 7;
        let parsed = RequestHeader::parse(&t).unwrap();
        assert_eq!(parsed.size, 176);
        assert_eq!(parsed.device_id, 127);
        assert_eq!(parsed.timestamp, 1000);
        assert_eq!(parsed.challenge, 77);

        let mut r = header(3);
        write_u32(&mut r, MESSAGE_SIZE_OFFSET, 4);
        assert_eq!(RequestHeader::parse(&r).unwrap().size, 68);
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(RequestHeader::parse(&[0u8; 10]), Err(ProtocolError::ShortBuffer { .. })));
        assert_eq!(RequestHeader::parse(&header(9)), Err(ProtocolError::UnknownProtocol(9)));
        let mut t = header(2);
        t[EVENT_COUNT_OFFSET] = 33;
        assert!(matches!(RequestHeader::parse(&t), Err(ProtocolError::Oversized { .. })));
        let mut r = header(3);
        write_u32(&mut r, MESSAGE_SIZE_OFFSET, 257);
        assert!(matches!(RequestHeader::parse(&r), Err(ProtocolError::Oversized { .. })));
    }
}
