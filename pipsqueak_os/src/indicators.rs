// Green/red status lamps. The host build has no LEDs, so lamp changes are
// logged; the levels are still computed for whoever wires them up.

use tracing::info;

use crate::state::DeviceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// 250 ms on, 250 ms off
    DotDot,
    /// 250 ms on, 500 ms off
    DotDash,
    /// 500 ms on, 250 ms off
    DashDot,
    /// 500 ms on, 250 off, 250 on, 250 off
    DashDotDotDot,
}

impl Pattern {
    pub fn level(self, millis: u64) -> bool {
        let phase = |slot: u64, count: u64| (millis / slot) % count;
        match self {
            Pattern::DotDot => phase(250, 2) < 1,
            Pattern::DotDash => phase(250, 3) < 1,
            Pattern::DashDot => phase(250, 3) < 2,
            Pattern::DashDotDotDot => {
                let p = phase(250, 5);
                p < 2 || p == 3
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lamp {
    Off,
    On,
    Blink(Pattern),
}

impl Lamp {
    pub fn level(self, millis: u64) -> bool {
        match self {
            Lamp::Off => false,
            Lamp::On => true,
            Lamp::Blink(pattern) => pattern.level(millis),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lamps {
    pub green: Lamp,
    pub red: Lamp,
}

/// Later checks override earlier ones: a sensor fault trumps a network
/// complaint, overheating trumps everything.
pub fn lamps(state: &DeviceState, wifi_up: bool) -> Lamps {
    if !state.is_initialized() {
        return Lamps { green: Lamp::Blink(Pattern::DotDot), red: Lamp::Off };
    }

    let mut green = Lamp::On;
    let mut red = Lamp::Off;

    if !wifi_up {
        red = Lamp::Blink(Pattern::DotDash);
    } else if !state.is_clock_synchronized() {
        red = Lamp::Blink(Pattern::DashDotDotDot);
    } else if !state.is_server_connection_healthy() {
        red = Lamp::Blink(Pattern::DashDot);
    }

    if !state.is_board_sensor_detected() || state.board_temperature().is_nan() {
        green = Lamp::Off;
        red = Lamp::Blink(Pattern::DotDash);
    } else if !state.is_remote_sensor_detected() || state.remote_temperature().is_nan() {
        green = Lamp::Off;
        red = Lamp::Blink(Pattern::DashDotDotDot);
    }

    if state.is_overheated() {
        green = Lamp::Off;
        red = Lamp::On;
    }

    Lamps { green, red }
}

#[derive(Debug, Default)]
pub struct Indicators {
    current: Option<Lamps>,
}

impl Indicators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (green, red) levels for this instant.
    pub fn poll(&mut self, state: &DeviceState, wifi_up: bool) -> (bool, bool) {
        let next = lamps(state, wifi_up);
        if self.current != Some(next) {
            info!(event = "indicators", green = ?next.green, red = ?next.red);
            self.current = Some(next);
        }
        let millis = state.millis();
        (next.green.level(millis), next.red.level(millis))
    }
}
