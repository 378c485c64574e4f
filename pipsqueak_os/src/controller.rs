// Bang-bang thermal control with mandatory recovery between pulses.
//
// Heater pulses are long and pulse-width modulated; chiller pulses are short
// and full on. After any pulse nothing may start until the recovery interval
// has passed, whatever the temperature does.

use tracing::{debug, info, warn};

use crate::state::DeviceState;

pub const HEATER_PULSE_DURATION: u32 = 10_000;
pub const HEATER_PULSE_POWER: u8 = 100;
pub const HEATER_RECOVERY_DURATION: u32 = 120_000;

pub const CHILLER_PULSE_DURATION: u32 = 1_000;
pub const CHILLER_RECOVERY_DURATION: u32 = 60_000;

/// Quiet period after boot before the first pulse.
pub const INITIAL_QUIET_PERIOD: u32 = 30_000;

/// 12-bit DS18B20 steps; anything tighter would chase quantization noise.
pub const REMOTE_SENSOR_RESOLUTION: f32 = 0.0625;
pub const TEMPERATURE_TOLERANCE: f32 = REMOTE_SENSOR_RESOLUTION;

pub const PWM_PERIOD_MS: u64 = 100;

/// Relay drive. The hardware variant toggles GPIOs; the host build logs.
pub trait Outputs {
    fn set_heater(&mut self, on: bool);
    fn set_chiller(&mut self, on: bool);
}

/// Power is delivered for the first `percent_power` ms of every 100 ms period;
/// values above 100 simply mean always on.
#[inline]
pub fn heater_level(millis: u64, percent_power: u8) -> bool {
    (millis % PWM_PERIOD_MS) < percent_power as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Heating,
    Chilling,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pulse {
    Off,
    Heater,
    Chiller,
}

pub struct Controller<O: Outputs> {
    outputs: O,
    pulse: Pulse,
    pulse_duration: u32,
    recovery_duration: u32,
    last_toggled: u64,
}

impl<O: Outputs> Controller<O> {
    pub fn new(mut outputs: O) -> Self {
        outputs.set_heater(false);
        outputs.set_chiller(false);
        Self {
            outputs,
            pulse: Pulse::Off,
            pulse_duration: 0,
            recovery_duration: INITIAL_QUIET_PERIOD,
            last_toggled: 0,
        }
    }

    #[cfg(test)]
    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn poll(&mut self, state: &mut DeviceState) {
        let now = state.millis();
        if self.should_heat(state, now) {
            self.heater_pulse(state, now);
        }
        if self.should_chill(state, now) {
            self.chiller_pulse(state, now);
        }
        if self.should_stop(state, now) {
            self.stop(state, now);
        }
        if self.pulse == Pulse::Heater {
            self.outputs.set_heater(heater_level(now, HEATER_PULSE_POWER));
        }
    }

    pub fn mode(&self, now: u64) -> Mode {
        match self.pulse {
            Pulse::Heater => Mode::Heating,
            Pulse::Chiller => Mode::Chilling,
            Pulse::Off if self.is_recovering(now) => Mode::Recovering,
            Pulse::Off => Mode::Idle,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.pulse != Pulse::Off
    }

    pub fn is_recovering(&self, now: u64) -> bool {
        !self.is_running() && now.saturating_sub(self.last_toggled) < self.recovery_duration as u64
    }

    fn may_start(&self, state: &DeviceState, now: u64) -> Option<f32> {
        if self.is_running() || self.is_recovering(now) || !state.is_safe_to_operate() {
            return None;
        }
        let temperature = state.remote_temperature();
        (!temperature.is_nan()).then_some(temperature)
    }

    fn should_heat(&self, state: &DeviceState, now: u64) -> bool {
        let lower = state.config().temperature_setpoint() - TEMPERATURE_TOLERANCE;
        self.may_start(state, now).is_some_and(|t| t < lower)
    }

    fn should_chill(&self, state: &DeviceState, now: u64) -> bool {
        let upper = state.config().temperature_setpoint() + TEMPERATURE_TOLERANCE;
        self.may_start(state, now).is_some_and(|t| t > upper)
    }

    fn should_stop(&self, state: &DeviceState, now: u64) -> bool {
        if !self.is_running() {
            return false;
        }
        if !state.is_safe_to_operate() {
            return true;
        }
        now.saturating_sub(self.last_toggled) >= self.pulse_duration as u64
    }

    fn heater_pulse(&mut self, state: &mut DeviceState, now: u64) {
        self.pulse = Pulse::Heater;
        self.pulse_duration = HEATER_PULSE_DURATION;
        self.recovery_duration = HEATER_RECOVERY_DURATION;
        self.last_toggled = now;
        info!(
            event = "heater_pulse",
            remote_c = format_args!("{:.4}", state.remote_temperature()),
            setpoint_c = format_args!("{:.4}", state.config().temperature_setpoint()),
            duration_ms = HEATER_PULSE_DURATION,
            power = HEATER_PULSE_POWER,
        );
        state.record_heater_pulse(HEATER_PULSE_DURATION, HEATER_PULSE_POWER, HEATER_RECOVERY_DURATION);
    }

    fn chiller_pulse(&mut self, state: &mut DeviceState, now: u64) {
        self.pulse = Pulse::Chiller;
        self.pulse_duration = CHILLER_PULSE_DURATION;
        self.recovery_duration = CHILLER_RECOVERY_DURATION;
        self.last_toggled = now;
        info!(
            event = "chiller_pulse",
            remote_c = format_args!("{:.4}", state.remote_temperature()),
            setpoint_c = format_args!("{:.4}", state.config().temperature_setpoint()),
            duration_ms = CHILLER_PULSE_DURATION,
        );
        state.record_chiller_pulse(CHILLER_PULSE_DURATION, CHILLER_RECOVERY_DURATION);
        self.outputs.set_chiller(true);
    }

    fn stop(&mut self, state: &DeviceState, now: u64) {
        if state.is_safe_to_operate() {
            debug!(event = "pulse_end", ran_ms = now.saturating_sub(self.last_toggled));
        } else {
            warn!(event = "pulse_aborted", ran_ms = now.saturating_sub(self.last_toggled));
        }
        self.outputs.set_heater(false);
        self.outputs.set_chiller(false);
        self.pulse = Pulse::Off;
        self.last_toggled = now;
    }
}

/// Host stand-in for the relays.
#[derive(Debug, Default)]
pub struct LogOutputs {
    heater: bool,
    chiller: bool,
}

impl Outputs for LogOutputs {
    fn set_heater(&mut self, on: bool) {
        if on != self.heater {
            debug!(event = "relay", which = "heater", on);
            self.heater = on;
        }
    }

    fn set_chiller(&mut self, on: bool) {
        if on != self.chiller {
            debug!(event = "relay", which = "chiller", on);
            self.chiller = on;
        }
    }
}
