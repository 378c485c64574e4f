// lib.rs: Pipsqueak wire protocol. HMAC-signed requests, fixed responses, status events

use serde::{Deserialize, Serialize};

pub mod codes;
pub mod error;
pub mod event;
pub mod frame;
pub mod auth;
pub mod queue;
pub mod request;
pub mod response;

pub use codes::{ErrorRecord, ErrorType};
pub use error::{ProtocolError, Result};
pub use event::{EventRecord, StatusEvent};
pub use frame::RequestHeader;
pub use auth::HmacEngine;
pub use queue::{EventRing, InsertResult, StatusEventQueue};
pub use request::{
    ReportRebootRequest, Request, RequestSet, SetpointRequest, TelemetryRequest, TimeRequest,
};
pub use response::Response;

// =============================== Common =====================================

pub const HMAC_SIZE: usize = 32;

pub const REQUEST_HEADER_SIZE: usize = 32;
pub const REQUEST_BASE_SIZE: usize = REQUEST_HEADER_SIZE + HMAC_SIZE;

pub const RESPONSE_HEADER_SIZE: usize = 32;
pub const RESPONSE_BASE_SIZE: usize = RESPONSE_HEADER_SIZE + HMAC_SIZE;

pub const STATUS_EVENT_SIZE: usize = 16;

pub const TELEMETRY_EVENT_LIMIT: usize = 32;
pub const REBOOT_MESSAGE_LIMIT: usize = 256;

/// Largest request any protocol can produce (a full telemetry batch).
pub const MAX_REQUEST_SIZE: usize = REQUEST_BASE_SIZE + STATUS_EVENT_SIZE * TELEMETRY_EVENT_LIMIT;

pub const DEFAULT_SERVER_PORT: u16 = 9001;

// =============================== Enums ======================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProtocolKind {
    Time = 0x00,
    Setpoint = 0x01,
    Telemetry = 0x02,
    ReportReboot = 0x03,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 4] = [
        ProtocolKind::Time,
        ProtocolKind::Setpoint,
        ProtocolKind::Telemetry,
        ProtocolKind::ReportReboot,
    ];

    #[inline]
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolKind::Time => "time",
            ProtocolKind::Setpoint => "setpoint",
            ProtocolKind::Telemetry => "telemetry",
            ProtocolKind::ReportReboot => "report_reboot",
        }
    }
}

impl TryFrom<u8> for ProtocolKind {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self> {
        ProtocolKind::ALL
            .into_iter()
            .find(|kind| kind.id() == id)
            .ok_or(ProtocolError::UnknownProtocol(id))
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================ Byte helpers ==================================

#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(buf, offset))
}

#[inline]
pub(crate) fn write_f32(buf: &mut [u8], offset: usize, value: f32) {
    write_u32(buf, offset, value.to_bits());
}

// ================================ Tests =====================================
