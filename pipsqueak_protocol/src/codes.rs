// Error taxonomy shared by device and server. Codes travel inside error status
// events, so the numeric values are part of the wire contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorType {
    None = 0,
    Pipsqueak = 1,
    TcpStack = 2,
}

impl From<u8> for ErrorType {
    fn from(raw: u8) -> Self {
        match raw {
            1 => ErrorType::Pipsqueak,
            2 => ErrorType::TcpStack,
            _ => ErrorType::None,
        }
    }
}

/// Placeholder meaning "no error".
pub const ERROR_NONE: i8 = 0;

/// Problems seen by the device while talking to the server (-1..=-32).
pub mod network {
    pub const WIFI_CONNECTION: i8 = -1;
    pub const CONNECTION_FAILED: i8 = -2;
    pub const CLIENT_STATE: i8 = -3;
    pub const BUFFER_FULL: i8 = -4;
    pub const BROKEN_PIPE: i8 = -5;
    pub const CONNECTION_LOST: i8 = -6;
    pub const TIMEOUT: i8 = -7;
}

/// Problems the server reported about a request (1..=31), decoded from status flags.
pub mod request {
    pub const CLOCK_SYNC_BEHIND: i8 = 1;
    pub const CLOCK_SYNC_AHEAD: i8 = 2;
    pub const AUTHENTICATION: i8 = 3;
    pub const RATE_LIMITED: i8 = 4;
    pub const EXCESS_DATA: i8 = 5;
    pub const DEVICE_NOT_REGISTERED: i8 = 6;
    pub const CONCURRENT_REQUESTS: i8 = 7;
    pub const UNKNOWN_EVENT_TYPE: i8 = 8;
    /// A request was staged without any meaningful payload.
    pub const NOT_POPULATED: i8 = 9;
}

/// Problems the device found in a server response (32..=64).
pub mod response {
    pub const EXCESS_DATA: i8 = 32;
    pub const TRUNCATED: i8 = 33;
    pub const AUTHENTICATION: i8 = 34;
    pub const INVALID_PROTOCOL: i8 = 35;
    pub const CHALLENGE_FAILED: i8 = 36;
}

/// Local health conditions of the device (65..).
pub mod device {
    pub const CLOCK_SYNC: i8 = 65;
    pub const BOARD_SENSOR_DETECTION: i8 = 66;
    pub const REMOTE_SENSOR_DETECTION: i8 = 67;
    pub const OVERHEATED: i8 = 68;
    pub const BOARD_TEMPERATURE_NAN: i8 = 69;
    pub const REMOTE_TEMPERATURE_NAN: i8 = 70;
    pub const WIFI_CONNECTION: i8 = 71;
}

/// lwIP `err_t` values surfaced by the TCP stack as `ErrorType::TcpStack` codes.
pub mod tcp {
    pub const MEMORY: i8 = -1;
    pub const BUFFER: i8 = -2;
    pub const TIMEOUT: i8 = -3;
    pub const ROUTING: i8 = -4;
    pub const IN_PROGRESS: i8 = -5;
    pub const ILLEGAL_VALUE: i8 = -6;
    pub const WOULD_BLOCK: i8 = -7;
    pub const ADDRESS_IN_USE: i8 = -8;
    pub const ALREADY_CONNECTING: i8 = -9;
    pub const ALREADY_CONNECTED: i8 = -10;
    pub const NOT_CONNECTED: i8 = -11;
    pub const INTERFACE: i8 = -12;
    pub const ABORTED: i8 = -13;
    pub const RESET: i8 = -14;
    pub const CLOSED: i8 = -15;
    pub const ILLEGAL_ARGUMENT: i8 = -16;
}

/// Response byte 9 bitmask set by the server.
pub mod status {
    pub const CLOCK_SYNC_BEHIND: u8 = 0x01;
    pub const CLOCK_SYNC_AHEAD: u8 = 0x02;
    pub const AUTHENTICATION: u8 = 0x04;
    pub const RATE_LIMITED: u8 = 0x08;
    pub const EXCESS_DATA: u8 = 0x10;
    pub const DEVICE_NOT_REGISTERED: u8 = 0x20;
    pub const CONCURRENT_REQUESTS: u8 = 0x40;
    pub const UNKNOWN_EVENT_TYPE: u8 = 0x80;

    /// Flag → request error code, in bit order.
    pub const FLAG_CODES: [(u8, i8); 8] = [
        (CLOCK_SYNC_BEHIND, super::request::CLOCK_SYNC_BEHIND),
        (CLOCK_SYNC_AHEAD, super::request::CLOCK_SYNC_AHEAD),
        (AUTHENTICATION, super::request::AUTHENTICATION),
        (RATE_LIMITED, super::request::RATE_LIMITED),
        (EXCESS_DATA, super::request::EXCESS_DATA),
        (DEVICE_NOT_REGISTERED, super::request::DEVICE_NOT_REGISTERED),
        (CONCURRENT_REQUESTS, super::request::CONCURRENT_REQUESTS),
        (UNKNOWN_EVENT_TYPE, super::request::UNKNOWN_EVENT_TYPE),
    ];

    /// Request error codes for every flag set in `flags`.
    pub fn request_errors(flags: u8) -> impl Iterator<Item = i8> {
        FLAG_CODES
            .into_iter()
            .filter(move |(mask, _)| flags & mask == *mask)
            .map(|(_, code)| code)
    }
}

/// A `(type, code)` pair as carried by responses and error status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_type: ErrorType,
    pub code: i8,
}

impl ErrorRecord {
    #[inline]
    pub const fn pipsqueak(code: i8) -> Self {
        Self { error_type: ErrorType::Pipsqueak, code }
    }

    #[inline]
    pub const fn tcp(code: i8) -> Self {
        Self { error_type: ErrorType::TcpStack, code }
    }

    /// True for the server's clock-skew verdicts, which call for a time resync.
    pub fn is_clock_skew(&self) -> bool {
        self.error_type == ErrorType::Pipsqueak
            && (self.code == request::CLOCK_SYNC_BEHIND || self.code == request::CLOCK_SYNC_AHEAD)
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.error_type, self.code)
    }
}
