// Temperature sensing: two DS18B20 probes on one bus, one on the board and
// one in the vessel. Probes are converted alternately; filtered readings are
// pushed into device state every poll so staleness shows up as NaN.

pub mod filter;
pub mod sim;

use heapless::Vec as FixedVec;
use tracing::{debug, info, warn};

use crate::config::{SensorAddress, DS18B20_FAMILY_CODE};
use crate::state::DeviceState;
use filter::ReadingFilter;

/// More than we accept, so an overcrowded bus can be recognised.
pub const MAX_DETECTED: usize = 4;
pub const MAX_PROBES: usize = 2;

pub const BOARD_READING_TTL: u64 = 1_000;
pub const REMOTE_READING_TTL: u64 = 5_000;

pub const MAX_READ_ATTEMPTS: u8 = 10;
pub const DETECT_INTERVAL_MS: u64 = 1_000;

/// The one-wire bus as the rest of the firmware sees it.
pub trait SensorBus {
    fn detect(&mut self) -> FixedVec<SensorAddress, MAX_DETECTED>;
    /// Latest conversion result in °C; `None` on a CRC failure or missing probe.
    fn read(&mut self, address: &SensorAddress) -> Option<f32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Bits9,
    Bits12,
}

impl Resolution {
    pub fn conversion_ms(self) -> u64 {
        match self {
            Resolution::Bits9 => 94,
            Resolution::Bits12 => 750,
        }
    }

    pub fn step(self) -> f32 {
        match self {
            Resolution::Bits9 => 0.5,
            Resolution::Bits12 => 0.0625,
        }
    }

    /// The probe drops the undefined low bits, which rounds toward -inf.
    pub fn quantize(self, celsius: f32) -> f32 {
        (celsius / self.step()).floor() * self.step()
    }
}

#[derive(Debug)]
struct Probe {
    address: SensorAddress,
    resolution: Resolution,
    filter: ReadingFilter,
    sensing_since: Option<u64>,
    attempts: u8,
    reported: bool,
}

impl Probe {
    fn new(address: SensorAddress, resolution: Resolution, ttl_ms: u64) -> Self {
        Self {
            address,
            resolution,
            filter: ReadingFilter::new(ttl_ms),
            sensing_since: None,
            attempts: 0,
            reported: false,
        }
    }

    fn is_sensing(&self) -> bool {
        self.sensing_since.is_some()
    }

    fn start(&mut self, now: u64) {
        if self.sensing_since.is_none() {
            self.sensing_since = Some(now);
        }
    }

    fn is_ready(&self, now: u64) -> bool {
        self.sensing_since
            .is_some_and(|since| now.saturating_sub(since) >= self.resolution.conversion_ms())
    }

    fn sample<B: SensorBus>(&mut self, bus: &mut B, now: u64) {
        match bus.read(&self.address) {
            Some(celsius) => {
                self.filter.update(self.resolution.quantize(celsius), now);
                self.done();
            }
            None => {
                self.attempts += 1;
                if self.attempts > MAX_READ_ATTEMPTS {
                    debug!(event = "probe_read_abandoned", address = %hex::encode(self.address));
                    self.done();
                }
            }
        }
    }

    fn done(&mut self) {
        self.attempts = 0;
        self.sensing_since = None;
    }

    /// Nothing until the filter first settles; after that, NaN means stale.
    fn report(&mut self, now: u64) -> Option<f32> {
        let t = self.filter.temperature(now);
        if !t.is_nan() {
            self.reported = true;
        }
        self.reported.then_some(t)
    }
}

pub struct SensorService<B: SensorBus> {
    bus: B,
    board: Option<Probe>,
    remote: Option<Probe>,
    remote_next: bool,
    last_detect: Option<u64>,
}

impl<B: SensorBus> SensorService<B> {
    pub fn new(bus: B) -> Self {
        Self { bus, board: None, remote: None, remote_next: false, last_detect: None }
    }

    #[cfg(test)]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn poll(&mut self, state: &mut DeviceState) {
        let now = state.millis();
        if self.board.is_none() || self.remote.is_none() {
            self.detect(state, now);
        }

        if let Some(probe) = self.board.as_mut() {
            if probe.is_ready(now) {
                probe.sample(&mut self.bus, now);
            }
            if let Some(t) = probe.report(now) {
                state.set_board_temperature(t);
            }
        }
        if let Some(probe) = self.remote.as_mut() {
            if probe.is_ready(now) {
                probe.sample(&mut self.bus, now);
            }
            if let Some(t) = probe.report(now) {
                state.set_remote_temperature(t);
            }
        }

        let busy = self.board.as_ref().is_some_and(Probe::is_sensing)
            || self.remote.as_ref().is_some_and(Probe::is_sensing);
        if !busy {
            let next = if self.remote_next { self.remote.as_mut() } else { self.board.as_mut() };
            if let Some(probe) = next {
                probe.start(now);
            }
            self.remote_next = !self.remote_next;
        }
    }

    fn detect(&mut self, state: &mut DeviceState, now: u64) {
        if self.last_detect.is_some_and(|at| now.saturating_sub(at) < DETECT_INTERVAL_MS) {
            return;
        }
        self.last_detect = Some(now);

        let found = self.bus.detect();
        let probes = || found.iter().filter(|a| a[0] == DS18B20_FAMILY_CODE);
        let count = probes().count();
        if count == 0 {
            debug!(event = "sensor_detect", count);
            return;
        }
        if count > MAX_PROBES {
            warn!(event = "sensor_detect", count, "too many probes on the bus");
            return;
        }

        if self.board.is_none() {
            if let Some(address) = probes().find(|a| state.config().is_board_sensor_address(a)) {
                info!(event = "sensor_detected", which = "board", address = %hex::encode(address));
                self.board = Some(Probe::new(*address, Resolution::Bits9, BOARD_READING_TTL));
                state.set_board_sensor_detected(true);
            }
        }
        // whatever is not the board probe is the remote probe
        if self.board.is_some() && self.remote.is_none() {
            if let Some(address) = probes().find(|a| !state.config().is_board_sensor_address(a)) {
                info!(event = "sensor_detected", which = "remote", address = %hex::encode(address));
                self.remote = Some(Probe::new(*address, Resolution::Bits12, REMOTE_READING_TTL));
                state.set_remote_sensor_detected(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::tests::new_state;

    const REMOTE: SensorAddress = [0x28, 1, 2, 3, 4, 5, 6, 7];

    struct FakeBus {
        devices: std::vec::Vec<(SensorAddress, Option<f32>)>,
        detects: usize,
    }

    impl SensorBus for FakeBus {
        fn detect(&mut self) -> FixedVec<SensorAddress, MAX_DETECTED> {
            self.detects += 1;
            self.devices.iter().take(MAX_DETECTED).map(|(a, _)| *a).collect()
        }

        fn read(&mut self, address: &SensorAddress) -> Option<f32> {
            self.devices.iter().find(|(a, _)| a == address).and_then(|(_, v)| *v)
        }
    }

    fn board_address(state: &DeviceState) -> SensorAddress {
        state.config().board_sensor_address
    }

    fn run(service: &mut SensorService<FakeBus>, state: &mut DeviceState, clock: &ManualClock, ms: u64) {
        for _ in 0..ms / 10 {
            clock.advance(10);
            service.poll(state);
        }
    }

    #[test]
    fn detects_and_settles_both_probes() {
        let (mut state, clock) = new_state();
        let bus = FakeBus {
            devices: vec![(REMOTE, Some(19.97)), (board_address(&state), Some(30.3))],
            detects: 0,
        };
        let mut service = SensorService::new(bus);
        service.poll(&mut state);
        assert!(state.is_board_sensor_detected());
        assert!(state.is_remote_sensor_detected());
        assert!(state.board_temperature().is_nan());

        run(&mut service, &mut state, &clock, 5_000);
        assert_eq!(state.board_temperature(), 30.0);
        assert_eq!(state.remote_temperature(), 19.9375);
        // nothing left to find
        assert_eq!(service.bus_mut().detects, 1);
    }

    #[test]
    fn remote_goes_stale_when_reads_fail() {
        let (mut state, clock) = new_state();
        let bus = FakeBus {
            devices: vec![(board_address(&state), Some(30.0)), (REMOTE, Some(20.0))],
            detects: 0,
        };
        let mut service = SensorService::new(bus);
        run(&mut service, &mut state, &clock, 5_000);
        assert_eq!(state.remote_temperature(), 20.0);

        service.bus_mut().devices[1].1 = None;
        run(&mut service, &mut state, &clock, REMOTE_READING_TTL + 1_000);
        assert!(state.remote_temperature().is_nan());
        assert_eq!(state.board_temperature(), 30.0);
    }

    #[test]
    fn crowded_bus_is_rejected() {
        let (mut state, clock) = new_state();
        let board = board_address(&state);
        let bus = FakeBus {
            devices: vec![(board, Some(30.0)), (REMOTE, Some(20.0)), ([0x28, 9, 9, 9, 9, 9, 9, 9], Some(1.0))],
            detects: 0,
        };
        let mut service = SensorService::new(bus);
        run(&mut service, &mut state, &clock, 2_500);
        assert!(!state.is_board_sensor_detected());
        assert!(!state.is_remote_sensor_detected());
        // retried at the detect interval, not every poll
        assert_eq!(service.bus_mut().detects, 3);
    }

    #[test]
    fn remote_needs_the_board_probe_first() {
        let (mut state, clock) = new_state();
        let bus = FakeBus { devices: vec![(REMOTE, Some(20.0))], detects: 0 };
        let mut service = SensorService::new(bus);
        run(&mut service, &mut state, &clock, 100);
        assert!(!state.is_remote_sensor_detected());

        let board = board_address(&state);
        service.bus_mut().devices.push((board, Some(30.0)));
        run(&mut service, &mut state, &clock, 1_000);
        assert!(state.is_board_sensor_detected());
        assert!(state.is_remote_sensor_detected());
    }

    #[test]
    fn other_families_are_ignored() {
        let (mut state, _) = new_state();
        let bus = FakeBus { devices: vec![([0x10, 1, 1, 1, 1, 1, 1, 1], Some(1.0))], detects: 0 };
        let mut service = SensorService::new(bus);
        service.poll(&mut state);
        assert!(!state.is_board_sensor_detected());
    }

    #[test]
    fn quantization_truncates() {
        assert_eq!(Resolution::Bits12.quantize(19.97), 19.9375);
        assert_eq!(Resolution::Bits9.quantize(30.3), 30.0);
        assert_eq!(Resolution::Bits9.quantize(-0.1), -0.5);
    }
}
