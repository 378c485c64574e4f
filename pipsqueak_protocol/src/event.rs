// Status events: fixed 16-byte telemetry records.
//
//  0      type tag
//  1..5   timestamp (u32)
//  5..    variant payload; offset 5 is shared by temperature, setpoint,
//         pulse duration and error type

use serde::{Deserialize, Serialize};

use crate::codes::{ErrorRecord, ErrorType};
use crate::error::{ProtocolError, Result};
use crate::{read_f32, read_u32, write_f32, write_u32, STATUS_EVENT_SIZE};

pub type EventRecord = [u8; STATUS_EVENT_SIZE];

pub const TYPE_OFFSET: usize = 0;
pub const TIMESTAMP_OFFSET: usize = 1;
pub const TEMPERATURE_OFFSET: usize = 5;
pub const SETPOINT_OFFSET: usize = 5;
pub const PULSE_DURATION_OFFSET: usize = 5;
pub const PERCENT_POWER_OFFSET: usize = 9;
pub const RECOVERY_DURATION_OFFSET: usize = 10;
pub const ERROR_TYPE_OFFSET: usize = 5;
pub const ERROR_CODE_OFFSET: usize = 6;

pub const TYPE_TEMPERATURE: u8 = 1;
pub const TYPE_SETPOINT: u8 = 2;
pub const TYPE_HEATER: u8 = 4;
pub const TYPE_ERROR: u8 = 6;
pub const TYPE_CHILLER: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    TemperatureObservation {
        timestamp: u32,
        temperature: f32,
    },
    TemperatureSetpoint {
        timestamp: u32,
        setpoint: f32,
    },
    Error {
        timestamp: u32,
        error: ErrorRecord,
    },
    /// Durations in milliseconds; power is the PWM duty cycle in percent.
    HeaterPulse {
        timestamp: u32,
        pulse_duration: u32,
        percent_power: u8,
        recovery_duration: u32,
    },
    ChillerPulse {
        timestamp: u32,
        pulse_duration: u32,
        recovery_duration: u32,
    },
}

impl StatusEvent {
    pub fn type_tag(&self) -> u8 {
        match self {
            StatusEvent::TemperatureObservation { .. } => TYPE_TEMPERATURE,
            StatusEvent::TemperatureSetpoint { .. } => TYPE_SETPOINT,
            StatusEvent::Error { .. } => TYPE_ERROR,
            StatusEvent::HeaterPulse { .. } => TYPE_HEATER,
            StatusEvent::ChillerPulse { .. } => TYPE_CHILLER,
        }
    }

    pub fn timestamp(&self) -> u32 {
        match *self {
            StatusEvent::TemperatureObservation { timestamp, .. }
            | StatusEvent::TemperatureSetpoint { timestamp, .. }
            | StatusEvent::Error { timestamp, .. }
            | StatusEvent::HeaterPulse { timestamp, .. }
            | StatusEvent::ChillerPulse { timestamp, .. } => timestamp,
        }
    }

    pub fn encode(&self) -> EventRecord {
        let mut rec = [0u8; STATUS_EVENT_SIZE];
        rec[TYPE_OFFSET] = self.type_tag();
        write_u32(&mut rec, TIMESTAMP_OFFSET, self.timestamp());
        match *self {
            StatusEvent::TemperatureObservation { temperature, .. } => {
                write_f32(&mut rec, TEMPERATURE_OFFSET, temperature);
            }
            StatusEvent::TemperatureSetpoint { setpoint, .. } => {
                write_f32(&mut rec, SETPOINT_OFFSET, setpoint);
            }
            StatusEvent::Error { error, .. } => {
                rec[ERROR_TYPE_OFFSET] = error.error_type as u8;
                rec[ERROR_CODE_OFFSET] = error.code as u8;
            }
            StatusEvent::HeaterPulse { pulse_duration, percent_power, recovery_duration, .. } => {
                write_u32(&mut rec, PULSE_DURATION_OFFSET, pulse_duration);
                rec[PERCENT_POWER_OFFSET] = percent_power;
                write_u32(&mut rec, RECOVERY_DURATION_OFFSET, recovery_duration);
            }
            StatusEvent::ChillerPulse { pulse_duration, recovery_duration, .. } => {
                write_u32(&mut rec, PULSE_DURATION_OFFSET, pulse_duration);
                write_u32(&mut rec, RECOVERY_DURATION_OFFSET, recovery_duration);
            }
        }
        rec
    }

    pub fn decode(rec: &[u8]) -> Result<Self> {
        if rec.len() < STATUS_EVENT_SIZE {
            return Err(ProtocolError::ShortBuffer { expected: STATUS_EVENT_SIZE, actual: rec.len() });
        }
        let timestamp = read_u32(rec, TIMESTAMP_OFFSET);
        let event = match rec[TYPE_OFFSET] {
            TYPE_TEMPERATURE => StatusEvent::TemperatureObservation {
                timestamp,
                temperature: read_f32(rec, TEMPERATURE_OFFSET),
            },
            TYPE_SETPOINT => StatusEvent::TemperatureSetpoint {
                timestamp,
                setpoint: read_f32(rec, SETPOINT_OFFSET),
            },
            TYPE_ERROR => StatusEvent::Error {
                timestamp,
                error: ErrorRecord {
                    error_type: ErrorType::from(rec[ERROR_TYPE_OFFSET]),
                    code: rec[ERROR_CODE_OFFSET] as i8,
                },
            },
            TYPE_HEATER => StatusEvent::HeaterPulse {
                timestamp,
                pulse_duration: read_u32(rec, PULSE_DURATION_OFFSET),
                percent_power: rec[PERCENT_POWER_OFFSET],
                recovery_duration: read_u32(rec, RECOVERY_DURATION_OFFSET),
            },
            TYPE_CHILLER => StatusEvent::ChillerPulse {
                timestamp,
                pulse_duration: read_u32(rec, PULSE_DURATION_OFFSET),
                recovery_duration: read_u32(rec, RECOVERY_DURATION_OFFSET),
            },
            other => return Err(ProtocolError::UnknownEventType(other)),
        };
        Ok(event)
    }
}
