// Edge-triggered health tracking: one error event per transition into
// Unhealthy, never one per poll.

use pipsqueak_protocol::codes::device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    /// No verdict yet; the initialization window forces one.
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Next health for an observation, and whether it warrants an error event.
#[inline]
pub fn transition(current: Health, healthy: bool) -> (Health, bool) {
    if healthy {
        (Health::Healthy, false)
    } else {
        (Health::Unhealthy, current != Health::Unhealthy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Wifi,
    Clock,
    BoardSensor,
    BoardTemperature,
    RemoteSensor,
    RemoteTemperature,
}

pub const CONDITION_COUNT: usize = 6;

impl Condition {
    pub const ALL: [Condition; CONDITION_COUNT] = [
        Condition::Wifi,
        Condition::Clock,
        Condition::BoardSensor,
        Condition::BoardTemperature,
        Condition::RemoteSensor,
        Condition::RemoteTemperature,
    ];

    pub fn error_code(self) -> i8 {
        match self {
            Condition::Wifi => device::WIFI_CONNECTION,
            Condition::Clock => device::CLOCK_SYNC,
            Condition::BoardSensor => device::BOARD_SENSOR_DETECTION,
            Condition::BoardTemperature => device::BOARD_TEMPERATURE_NAN,
            Condition::RemoteSensor => device::REMOTE_SENSOR_DETECTION,
            Condition::RemoteTemperature => device::REMOTE_TEMPERATURE_NAN,
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct HealthBoard {
    slots: [Health; CONDITION_COUNT],
}

impl HealthBoard {
    #[inline]
    pub fn get(&self, condition: Condition) -> Health {
        self.slots[condition.index()]
    }

    #[inline]
    pub fn is_healthy(&self, condition: Condition) -> bool {
        self.get(condition) == Health::Healthy
    }

    /// Applies an observation; true when an error event should be recorded.
    pub fn observe(&mut self, condition: Condition, healthy: bool) -> bool {
        let (next, emit) = transition(self.get(condition), healthy);
        self.slots[condition.index()] = next;
        emit
    }

    pub fn all_known(&self) -> bool {
        self.slots.iter().all(|h| *h != Health::Unknown)
    }
}

pub const REQUEST_HISTORY: usize = 4;

/// Recent request outcomes. Starts optimistic so a fresh device is not
/// reported unhealthy before it has tried anything.
#[derive(Debug)]
pub struct OutcomeHistory {
    slots: [bool; REQUEST_HISTORY],
    cursor: usize,
}

impl Default for OutcomeHistory {
    fn default() -> Self {
        Self { slots: [true; REQUEST_HISTORY], cursor: 0 }
    }
}

impl OutcomeHistory {
    pub fn record(&mut self, success: bool) {
        self.slots[self.cursor] = success;
        self.cursor = (self.cursor + 1) % REQUEST_HISTORY;
    }

    pub fn is_healthy(&self) -> bool {
        self.slots.iter().any(|ok| *ok)
    }
}
