// Request inspection and response building. One registered device, one
// current setpoint; everything the device reports is logged as JSON lines.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pipsqueak_protocol::codes::status;
use pipsqueak_protocol::request::{EVENTS_OFFSET, MESSAGE_OFFSET, REBOOT_FLAG_OFFSET};
use pipsqueak_protocol::response::encode_response;
use pipsqueak_protocol::{
    HmacEngine, ProtocolError, ProtocolKind, StatusEvent, HMAC_SIZE, REQUEST_BASE_SIZE, RESPONSE_BASE_SIZE,
    STATUS_EVENT_SIZE,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::RawRequest;
use crate::config::Config;

/// What a request carried once it passed authentication.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Time,
    Setpoint { reboot: bool },
    Telemetry { events: Vec<StatusEvent> },
    ReportReboot { message: String },
}

#[derive(Debug, Serialize)]
struct LogLine<'a> {
    received_at: DateTime<Utc>,
    device_id: u32,
    protocol: ProtocolKind,
    flags: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a Report>,
}

#[derive(Debug)]
pub struct Verdict {
    pub flags: u8,
    pub report: Option<Report>,
}

pub struct Handler {
    device_id: u32,
    hmac: HmacEngine,
    setpoint: f32,
    max_skew_secs: u32,
    busy: Mutex<HashSet<u32>>,
}

/// Marks a device as mid-exchange until dropped.
pub struct Exchange {
    handler: Arc<Handler>,
    device_id: u32,
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.handler.busy.lock().remove(&self.device_id);
    }
}

impl Handler {
    pub fn from_config(cfg: &Config) -> Result<Self, ProtocolError> {
        Ok(Self {
            device_id: cfg.device_id,
            hmac: HmacEngine::new(&cfg.key)?,
            setpoint: cfg.setpoint,
            max_skew_secs: cfg.max_skew_secs,
            busy: Mutex::new(HashSet::new()),
        })
    }

    /// `None` when the device already has an exchange open.
    pub fn begin(self: &Arc<Self>, device_id: u32) -> Option<Exchange> {
        self.busy
            .lock()
            .insert(device_id)
            .then(|| Exchange { handler: self.clone(), device_id })
    }

    pub fn inspect(&self, request: &RawRequest, now: u32) -> Verdict {
        let header = &request.header;
        let bytes = &request.bytes[..];
        let mut flags = 0u8;

        if header.device_id != self.device_id {
            flags |= status::DEVICE_NOT_REGISTERED;
        }
        let (body, tag) = bytes.split_at(bytes.len() - HMAC_SIZE);
        if !self.hmac.validate(body, tag) {
            return Verdict { flags: flags | status::AUTHENTICATION, report: None };
        }

        // a time request exists to fix the clock, so its timestamp is not judged
        if header.protocol != ProtocolKind::Time {
            if header.timestamp.saturating_add(self.max_skew_secs) < now {
                flags |= status::CLOCK_SYNC_BEHIND;
            } else if header.timestamp > now.saturating_add(self.max_skew_secs) {
                flags |= status::CLOCK_SYNC_AHEAD;
            }
        }

        let report = match header.protocol {
            ProtocolKind::Time => Report::Time,
            ProtocolKind::Setpoint => Report::Setpoint { reboot: bytes[REBOOT_FLAG_OFFSET] != 0 },
            ProtocolKind::Telemetry => {
                let end = header.size - HMAC_SIZE;
                let mut events = Vec::new();
                for record in bytes[EVENTS_OFFSET..end].chunks_exact(STATUS_EVENT_SIZE) {
                    match StatusEvent::decode(record) {
                        Ok(event) => events.push(event),
                        Err(_) => flags |= status::UNKNOWN_EVENT_TYPE,
                    }
                }
                Report::Telemetry { events }
            }
            ProtocolKind::ReportReboot => {
                let len = header.size - REQUEST_BASE_SIZE;
                let raw = &bytes[MESSAGE_OFFSET..MESSAGE_OFFSET + len];
                let text = raw.split(|b| *b == 0).next().unwrap_or_default();
                Report::ReportReboot { message: String::from_utf8_lossy(text).into_owned() }
            }
        };
        Verdict { flags, report: Some(report) }
    }

    pub fn respond(&self, request: &RawRequest, flags: u8, now: u32) -> [u8; RESPONSE_BASE_SIZE] {
        let setpoint = match request.header.protocol {
            ProtocolKind::Setpoint | ProtocolKind::Telemetry => Some(self.setpoint),
            ProtocolKind::Time | ProtocolKind::ReportReboot => None,
        };
        encode_response(&self.hmac, request.header.protocol, now, setpoint, flags, request.header.challenge)
    }

    /// Full treatment of one framed request: inspect, log, answer.
    pub fn handle(&self, request: &RawRequest, extra_flags: u8, received_at: DateTime<Utc>) -> [u8; RESPONSE_BASE_SIZE] {
        let now = received_at.timestamp().clamp(0, u32::MAX as i64) as u32;
        let verdict = self.inspect(request, now);
        let flags = verdict.flags | extra_flags;

        let line = LogLine {
            received_at,
            device_id: request.header.device_id,
            protocol: request.header.protocol,
            flags,
            report: verdict.report.as_ref(),
        };
        match serde_json::to_string(&line) {
            Ok(json) => info!(target: "pipsqueak_server::requests", "{json}"),
            Err(e) => warn!(error = %e, "request log line not serializable"),
        }
        if flags != 0 {
            warn!(
                event = "request_flagged",
                device_id = request.header.device_id,
                protocol = %request.header.protocol,
                flags = format_args!("{flags:#010b}"),
            );
        }
        self.respond(request, flags, now)
    }
}
