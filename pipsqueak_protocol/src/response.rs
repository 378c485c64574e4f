// Server responses: 64 bytes, header + HMAC.
//
//  0      protocol id echo
//  1..5   server timestamp (u32)
//  5..9   setpoint (f32; setpoint and telemetry responses)
//  9      status flags
//  10..14 challenge echo (u32)
//  32..64 HMAC over bytes 0..32

use std::sync::Arc;

use heapless::Vec as FixedVec;
use tracing::debug;

use crate::auth::HmacEngine;
use crate::codes::{response as response_error, status, ErrorRecord};
use crate::{read_f32, read_u32, ProtocolKind, RESPONSE_BASE_SIZE, RESPONSE_HEADER_SIZE};

pub const PROTOCOL_ID_OFFSET: usize = 0;
pub const TIMESTAMP_OFFSET: usize = 1;
pub const SETPOINT_OFFSET: usize = 5;
pub const STATUS_OFFSET: usize = 9;
pub const CHALLENGE_OFFSET: usize = 10;
pub const HMAC_OFFSET: usize = RESPONSE_HEADER_SIZE;

pub const ERROR_COUNT_LIMIT: usize = 16;

/// Incoming bytes land in `live` as they arrive; `payload` is the settled copy
/// inspected once the exchange is over.
pub struct Response {
    protocol: ProtocolKind,
    hmac: Arc<HmacEngine>,
    live: [u8; RESPONSE_BASE_SIZE],
    payload: [u8; RESPONSE_BASE_SIZE],
    received: usize,
    challenge: u32,
    errors: FixedVec<ErrorRecord, ERROR_COUNT_LIMIT>,
    ready: bool,
    in_use: bool,
    elapsed: u32,
}

impl Response {
    pub fn new(protocol: ProtocolKind, hmac: Arc<HmacEngine>) -> Self {
        Self {
            protocol,
            hmac,
            live: [0u8; RESPONSE_BASE_SIZE],
            payload: [0u8; RESPONSE_BASE_SIZE],
            received: 0,
            challenge: 0,
            errors: FixedVec::new(),
            ready: false,
            in_use: false,
            elapsed: 0,
        }
    }

    pub fn reset(&mut self) {
        self.live.fill(0);
        self.payload.fill(0);
        self.received = 0;
        self.challenge = 0;
        self.errors.clear();
        self.ready = false;
        self.in_use = false;
        self.elapsed = 0;
    }

    #[inline]
    pub fn expected_protocol(&self) -> ProtocolKind {
        self.protocol
    }

    #[inline]
    pub const fn expected_size(&self) -> usize {
        RESPONSE_BASE_SIZE
    }

    /// Arms the response for an exchange.
    pub fn set_challenge(&mut self, challenge: u32) {
        self.challenge = challenge;
        self.in_use = true;
    }

    #[inline]
    pub fn challenge(&self) -> u32 {
        self.challenge
    }

    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Bytes past the expected size are counted but not stored.
    pub fn receive_bytes(&mut self, data: &[u8]) {
        if !self.in_use {
            return;
        }
        let start = self.received.min(self.expected_size());
        let take = (self.expected_size() - start).min(data.len());
        if take > 0 {
            self.live[start..start + take].copy_from_slice(&data[..take]);
        }
        if take < data.len() {
            self.add_error(ErrorRecord::pipsqueak(response_error::EXCESS_DATA));
        }
        self.received = self.received.saturating_add(data.len());
    }

    #[inline]
    pub fn bytes_received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.expected_size() || !self.errors.is_empty()
    }

    /// Settles the exchange. `elapsed` is the round trip in seconds.
    pub fn ready(&mut self, elapsed: u32) {
        let expected = self.expected_size();
        if self.received == expected {
            self.payload = self.live;
            let protocol_ok = self.inspect_protocol();
            let hmac_ok = self.inspect_hmac();
            let challenge_ok = self.inspect_challenge();
            if protocol_ok && hmac_ok && challenge_ok {
                self.inspect_status_flags();
            }
        } else if self.received > expected {
            self.add_error(ErrorRecord::pipsqueak(response_error::EXCESS_DATA));
        } else {
            self.add_error(ErrorRecord::pipsqueak(response_error::TRUNCATED));
        }
        self.elapsed = elapsed;
        self.ready = true;
        debug!(
            protocol = %self.protocol,
            received = self.received,
            errors = self.errors.len(),
            elapsed,
            "response settled"
        );
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[inline]
    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    /// Duplicates and anything past the 16th error are ignored.
    pub fn add_error(&mut self, error: ErrorRecord) {
        if self.errors.contains(&error) {
            return;
        }
        let _ = self.errors.push(error);
    }

    #[inline]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[inline]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn has_clock_skew(&self) -> bool {
        self.errors.iter().any(ErrorRecord::is_clock_skew)
    }

    // ---- settled payload accessors; meaningless if has_errors() ----

    pub fn payload(&self) -> &[u8; RESPONSE_BASE_SIZE] {
        &self.payload
    }

    pub fn protocol_echo(&self) -> u8 {
        self.payload[PROTOCOL_ID_OFFSET]
    }

    pub fn timestamp(&self) -> u32 {
        read_u32(&self.payload, TIMESTAMP_OFFSET)
    }

    pub fn status_flags(&self) -> u8 {
        self.payload[STATUS_OFFSET]
    }

    pub fn challenge_echo(&self) -> u32 {
        read_u32(&self.payload, CHALLENGE_OFFSET)
    }

    /// The server's desired setpoint; only setpoint and telemetry responses carry one.
    pub fn setpoint(&self) -> Option<f32> {
        match self.protocol {
            ProtocolKind::Setpoint | ProtocolKind::Telemetry => {
                Some(read_f32(&self.payload, SETPOINT_OFFSET))
            }
            ProtocolKind::Time | ProtocolKind::ReportReboot => None,
        }
    }

    fn inspect_protocol(&mut self) -> bool {
        let ok = self.protocol_echo() == self.protocol.id();
        if !ok {
            self.add_error(ErrorRecord::pipsqueak(response_error::INVALID_PROTOCOL));
        }
        ok
    }

    fn inspect_hmac(&mut self) -> bool {
        let ok = self
            .hmac
            .validate(&self.payload[..HMAC_OFFSET], &self.payload[HMAC_OFFSET..]);
        if !ok {
            self.add_error(ErrorRecord::pipsqueak(response_error::AUTHENTICATION));
        }
        ok
    }

    fn inspect_challenge(&mut self) -> bool {
        let ok = self.challenge_echo() == self.challenge;
        if !ok {
            self.add_error(ErrorRecord::pipsqueak(response_error::CHALLENGE_FAILED));
        }
        ok
    }

    fn inspect_status_flags(&mut self) {
        for code in status::request_errors(self.status_flags()) {
            self.add_error(ErrorRecord::pipsqueak(code));
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("protocol", &self.protocol)
            .field("received", &self.received)
            .field("challenge", &self.challenge)
            .field("errors", &self.errors)
            .field("ready", &self.ready)
            .field("in_use", &self.in_use)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

// ============================ Server side ===================================

/// Builds a signed response frame the way the server does. Setpoint is
/// written only when given.
pub fn encode_response(
    hmac: &HmacEngine,
    protocol: ProtocolKind,
    timestamp: u32,
    setpoint: Option<f32>,
    status_flags: u8,
    challenge: u32,
) -> [u8; RESPONSE_BASE_SIZE] {
    let mut out = [0u8; RESPONSE_BASE_SIZE];
    out[PROTOCOL_ID_OFFSET] = protocol.id();
    crate::write_u32(&mut out, TIMESTAMP_OFFSET, timestamp);
    if let Some(sp) = setpoint {
        crate::write_f32(&mut out, SETPOINT_OFFSET, sp);
    }
    out[STATUS_OFFSET] = status_flags;
    crate::write_u32(&mut out, CHALLENGE_OFFSET, challenge);
    let tag = hmac.generate(&out[..HMAC_OFFSET]);
    out[HMAC_OFFSET..].copy_from_slice(&tag);
    out
}
