// Device-wide state: configuration, clock, health verdicts and the status
// event queue every producer writes into.

pub mod health;

use pipsqueak_protocol::codes::device;
use pipsqueak_protocol::{ErrorRecord, EventRecord, InsertResult, StatusEvent, StatusEventQueue};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use health::{Condition, HealthBoard, OutcomeHistory};

pub const INITIALIZATION_WINDOW_MILLIS: u64 = 15_000;

pub struct DeviceState {
    config: Config,
    clock: Box<dyn Clock>,
    events: Box<StatusEventQueue>,
    health: HealthBoard,
    requests: OutcomeHistory,
    initialized: bool,
    overheated: bool,
    board_temperature: f32,
    remote_temperature: f32,
}

impl DeviceState {
    pub fn new(config: Config, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            events: Box::default(),
            health: HealthBoard::default(),
            requests: OutcomeHistory::default(),
            initialized: false,
            overheated: false,
            board_temperature: f32::NAN,
            remote_temperature: f32::NAN,
        }
    }

    /// Once per main-loop iteration.
    pub fn poll(&mut self, wifi_up: bool) {
        let overheated = !self.board_temperature.is_nan()
            && self.board_temperature > self.config.board_temperature_limit;
        if overheated && !self.overheated {
            warn!(
                event = "overheated",
                board_c = format_args!("{:.2}", self.board_temperature),
                limit_c = format_args!("{:.2}", self.config.board_temperature_limit),
            );
            self.record_error(ErrorRecord::pipsqueak(device::OVERHEATED));
        }
        self.overheated = overheated;

        if self.initialized {
            return;
        }
        if self.health.all_known() {
            self.initialized = true;
            info!(event = "initialized", millis = self.clock.millis());
        } else if self.clock.millis() > INITIALIZATION_WINDOW_MILLIS {
            for condition in Condition::ALL {
                if self.health.get(condition) != health::Health::Unknown {
                    continue;
                }
                // only WiFi can turn out fine here; everything else never reported in
                let healthy = condition == Condition::Wifi && wifi_up;
                self.observe(condition, healthy);
            }
            self.initialized = true;
            warn!(event = "initialization_window_lapsed", millis = self.clock.millis());
        }
    }

    // ===== accessors =====

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn now(&self) -> u32 {
        self.clock.now()
    }

    #[inline]
    pub fn millis(&self) -> u64 {
        self.clock.millis()
    }

    pub fn set_clock(&mut self, unix_secs: u32) {
        self.clock.set(unix_secs);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Subject to the usual disclaimers: both probes present and reading,
    /// board below its ceiling.
    pub fn is_safe_to_operate(&self) -> bool {
        self.is_board_sensor_detected()
            && !self.board_temperature.is_nan()
            && self.board_temperature <= self.config.board_temperature_limit
            && self.is_remote_sensor_detected()
            && !self.remote_temperature.is_nan()
    }

    pub fn is_overheated(&self) -> bool {
        self.overheated
    }

    pub fn is_server_connection_healthy(&self) -> bool {
        self.requests.is_healthy()
    }

    pub fn record_request_outcome(&mut self, success: bool) {
        self.requests.record(success);
        if !self.requests.is_healthy() {
            debug!(event = "server_unhealthy");
        }
    }

    // ===== health setters =====

    pub fn set_wifi_connected(&mut self, connected: bool) {
        // association takes a while; silence until it works or the window lapses
        if !connected && self.health.get(Condition::Wifi) == health::Health::Unknown {
            return;
        }
        self.observe(Condition::Wifi, connected);
    }

    pub fn is_clock_synchronized(&self) -> bool {
        self.health.is_healthy(Condition::Clock)
    }

    pub fn set_clock_synchronized(&mut self, synchronized: bool) {
        let was = self.is_clock_synchronized();
        self.observe(Condition::Clock, synchronized);
        if synchronized && !was {
            let now = self.now();
            info!(event = "clock_synchronized", now = %crate::clock::SystemClock::describe(now));
            // board temperature is deliberately not telemetered
            if self.health.get(Condition::RemoteTemperature) != health::Health::Unknown {
                self.enqueue(&StatusEvent::TemperatureObservation {
                    timestamp: now,
                    temperature: self.remote_temperature,
                });
            }
            self.enqueue(&StatusEvent::TemperatureSetpoint {
                timestamp: now,
                setpoint: self.config.temperature_setpoint(),
            });
        }
    }

    pub fn is_board_sensor_detected(&self) -> bool {
        self.health.is_healthy(Condition::BoardSensor)
    }

    pub fn set_board_sensor_detected(&mut self, detected: bool) {
        self.observe(Condition::BoardSensor, detected);
    }

    pub fn is_remote_sensor_detected(&self) -> bool {
        self.health.is_healthy(Condition::RemoteSensor)
    }

    pub fn set_remote_sensor_detected(&mut self, detected: bool) {
        self.observe(Condition::RemoteSensor, detected);
    }

    pub fn board_temperature(&self) -> f32 {
        self.board_temperature
    }

    pub fn set_board_temperature(&mut self, temperature: f32) {
        if self.health.get(Condition::BoardTemperature) != health::Health::Unknown
            && same_reading(self.board_temperature, temperature)
        {
            return;
        }
        debug!(event = "board_temperature", from = self.board_temperature, to = temperature);
        self.board_temperature = temperature;
        self.observe(Condition::BoardTemperature, !temperature.is_nan());
    }

    pub fn remote_temperature(&self) -> f32 {
        self.remote_temperature
    }

    /// Observed while the clock is synchronized, a change becomes a
    /// temperature event; otherwise the value is reported at the next sync.
    pub fn set_remote_temperature(&mut self, temperature: f32) {
        if self.health.get(Condition::RemoteTemperature) != health::Health::Unknown
            && same_reading(self.remote_temperature, temperature)
        {
            return;
        }
        debug!(event = "remote_temperature", from = self.remote_temperature, to = temperature);
        self.remote_temperature = temperature;
        self.observe(Condition::RemoteTemperature, !temperature.is_nan());
        if self.is_clock_synchronized() {
            self.enqueue(&StatusEvent::TemperatureObservation { timestamp: self.now(), temperature });
        }
    }

    pub fn set_remote_temperature_setpoint(&mut self, setpoint: f32) {
        if self.config.temperature_setpoint() == setpoint {
            return;
        }
        info!(
            event = "setpoint_changed",
            from = self.config.temperature_setpoint(),
            to = setpoint,
        );
        self.config.set_temperature_setpoint(setpoint);
        if self.is_clock_synchronized() {
            self.enqueue(&StatusEvent::TemperatureSetpoint { timestamp: self.now(), setpoint });
        }
    }

    // ===== status events =====

    /// Unsynchronized errors carry timestamp 0; the server knows what that means.
    pub fn record_error(&mut self, error: ErrorRecord) {
        let timestamp = if self.is_clock_synchronized() { self.now() } else { 0 };
        debug!(event = "error_recorded", %error, timestamp);
        self.enqueue(&StatusEvent::Error { timestamp, error });
    }

    pub fn record_errors(&mut self, errors: &[ErrorRecord]) {
        for error in errors {
            self.record_error(*error);
        }
    }

    pub fn record_heater_pulse(&mut self, pulse_duration: u32, percent_power: u8, recovery_duration: u32) {
        if self.is_clock_synchronized() {
            self.enqueue(&StatusEvent::HeaterPulse {
                timestamp: self.now(),
                pulse_duration,
                percent_power,
                recovery_duration,
            });
        }
    }

    pub fn record_chiller_pulse(&mut self, pulse_duration: u32, recovery_duration: u32) {
        if self.is_clock_synchronized() {
            self.enqueue(&StatusEvent::ChillerPulse {
                timestamp: self.now(),
                pulse_duration,
                recovery_duration,
            });
        }
    }

    pub fn has_status_events(&self) -> bool {
        self.events.has_events()
    }

    pub fn status_event_depth(&self) -> usize {
        self.events.depth()
    }

    pub fn dequeue_status_event(&mut self) -> Option<EventRecord> {
        self.events.dequeue()
    }

    #[cfg(test)]
    pub(crate) fn peek_status_events(&self) -> Vec<StatusEvent> {
        self.events.iter().filter_map(|rec| StatusEvent::decode(rec).ok()).collect()
    }

    fn enqueue(&mut self, event: &StatusEvent) {
        if self.events.enqueue(event) == InsertResult::Overwrote {
            debug!(event = "status_event_overwritten", depth = self.events.depth());
        }
    }

    fn observe(&mut self, condition: Condition, healthy: bool) {
        if self.health.observe(condition, healthy) {
            warn!(event = "unhealthy", condition = ?condition);
            self.record_error(ErrorRecord::pipsqueak(condition.error_code()));
        }
    }
}

/// NaN never equals itself, so two NaN readings count as "no change" here.
#[inline]
fn same_reading(a: f32, b: f32) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}
