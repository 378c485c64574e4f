// Host-side stand-in for the vessel: a lumped thermal model the simulated
// probes read from and the relays drive.

use std::sync::Arc;
use std::time::Instant;

use heapless::Vec as FixedVec;
use parking_lot::Mutex;
use rand::Rng;

use super::{SensorBus, MAX_DETECTED};
use crate::config::SensorAddress;
use crate::controller::{LogOutputs, Outputs};

pub const REMOTE_PROBE_ADDRESS: SensorAddress = [0x28, 0x61, 0x64, 0x12, 0x3C, 0x7A, 0x2F, 0x9E];

/// Fraction of the gap to ambient closed per second.
const LEAK_PER_SEC: f32 = 0.002;
const HEAT_PER_SEC: f32 = 0.05;
const CHILL_PER_SEC: f32 = 0.08;
const BOARD_SELF_HEATING: f32 = 5.0;
const NOISE: f32 = 0.04;

#[derive(Debug)]
pub struct Plant {
    ambient: f32,
    vessel: f32,
    heater: bool,
    chiller: bool,
    last: Instant,
}

impl Plant {
    pub fn new(ambient: f32) -> Self {
        Self { ambient, vessel: ambient, heater: false, chiller: false, last: Instant::now() }
    }

    pub fn shared(ambient: f32) -> SharedPlant {
        Arc::new(Mutex::new(Self::new(ambient)))
    }

    pub fn vessel(&self) -> f32 {
        self.vessel
    }

    pub fn board(&self) -> f32 {
        self.ambient + BOARD_SELF_HEATING
    }

    /// Exact for constant relays, so a long stall cannot overshoot.
    pub fn step(&mut self, secs: f32) {
        let mut drive = 0.0;
        if self.heater {
            drive += HEAT_PER_SEC;
        }
        if self.chiller {
            drive -= CHILL_PER_SEC;
        }
        let settled = self.ambient + drive / LEAK_PER_SEC;
        self.vessel = settled + (self.vessel - settled) * (-LEAK_PER_SEC * secs).exp();
    }

    fn catch_up(&mut self) {
        let now = Instant::now();
        let secs = now.duration_since(self.last).as_secs_f32();
        self.last = now;
        self.step(secs);
    }
}

pub type SharedPlant = Arc<Mutex<Plant>>;

pub struct SimulatedBus {
    plant: SharedPlant,
    board_address: SensorAddress,
}

impl SimulatedBus {
    pub fn new(plant: SharedPlant, board_address: SensorAddress) -> Self {
        Self { plant, board_address }
    }
}

impl SensorBus for SimulatedBus {
    fn detect(&mut self) -> FixedVec<SensorAddress, MAX_DETECTED> {
        let mut found = FixedVec::new();
        let _ = found.push(self.board_address);
        let _ = found.push(REMOTE_PROBE_ADDRESS);
        found
    }

    fn read(&mut self, address: &SensorAddress) -> Option<f32> {
        let mut plant = self.plant.lock();
        plant.catch_up();
        let truth = if *address == self.board_address {
            plant.board()
        } else if *address == REMOTE_PROBE_ADDRESS {
            plant.vessel()
        } else {
            return None;
        };
        Some(truth + rand::rng().random_range(-NOISE..NOISE))
    }
}

/// Relays wired into the plant, logged on change.
pub struct PlantOutputs {
    plant: SharedPlant,
    log: LogOutputs,
}

impl PlantOutputs {
    pub fn new(plant: SharedPlant) -> Self {
        Self { plant, log: LogOutputs::default() }
    }
}

impl Outputs for PlantOutputs {
    fn set_heater(&mut self, on: bool) {
        let mut plant = self.plant.lock();
        plant.catch_up();
        plant.heater = on;
        self.log.set_heater(on);
    }

    fn set_chiller(&mut self, on: bool) {
        let mut plant = self.plant.lock();
        plant.catch_up();
        plant.chiller = on;
        self.log.set_chiller(on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: SensorAddress = [0x28, 0xFF, 0x64, 0x1E, 0x82, 0x16, 0xC3, 0xA1];

    #[test]
    fn bus_reports_both_probes() {
        let plant = Plant::shared(24.0);
        let mut bus = SimulatedBus::new(plant, BOARD);
        let found = bus.detect();
        assert_eq!(found.as_slice(), &[BOARD, REMOTE_PROBE_ADDRESS]);

        let board = bus.read(&BOARD).unwrap();
        assert!((board - 29.0).abs() < 0.1, "{board}");
        let vessel = bus.read(&REMOTE_PROBE_ADDRESS).unwrap();
        assert!((vessel - 24.0).abs() < 0.1, "{vessel}");
        assert_eq!(bus.read(&[0x28; 8]), None);
    }

    #[test]
    fn relays_move_the_vessel() {
        let plant = Plant::shared(24.0);
        let mut outputs = PlantOutputs::new(plant.clone());

        outputs.set_heater(true);
        plant.lock().step(60.0);
        let warmed = plant.lock().vessel();
        assert!(warmed > 25.0, "{warmed}");

        outputs.set_heater(false);
        outputs.set_chiller(true);
        plant.lock().step(60.0);
        assert!(plant.lock().vessel() < warmed);
    }

    #[test]
    fn idle_vessel_relaxes_to_ambient() {
        let mut plant = Plant::new(24.0);
        plant.vessel = 10.0;
        plant.step(600.0);
        assert!(plant.vessel() > 10.0 && plant.vessel() < 24.0);

        // a stalled loop lands on ambient, never past it
        plant.step(1_000_000.0);
        assert!((plant.vessel() - 24.0).abs() < 1e-3, "{}", plant.vessel());
        assert!(plant.vessel() <= 24.0);
    }

    #[test]
    fn one_long_step_matches_many_short_ones() {
        let mut long = Plant::new(24.0);
        let mut short = Plant::new(24.0);
        long.heater = true;
        short.heater = true;
        long.step(600.0);
        for _ in 0..600 {
            short.step(1.0);
        }
        assert!((long.vessel() - short.vessel()).abs() < 0.01, "{} {}", long.vessel(), short.vessel());
    }
}
