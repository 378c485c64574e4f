// Per-probe smoothing and staleness.
//
// A reading is trusted only after a few samples. Big steps are taken at
// once; small wobbles must be confirmed by the running average first.

pub const HISTORY_SIZE: usize = 10;
pub const MIN_READINGS: usize = 3;

/// Larger than one 12-bit step: treat as a real change.
pub const STEP_THRESHOLD: f32 = 0.1;
/// Half a 12-bit step: the average must be this close to a small change.
pub const AVERAGE_WINDOW: f32 = 0.03125;

/// Power-on value of the DS18B20 temperature register; seen when the probe
/// is underpowered.
pub const POWER_ON_RESET_READING: f32 = 85.0;

#[derive(Debug, Clone)]
pub struct ReadingFilter {
    history: [f32; HISTORY_SIZE],
    cursor: usize,
    count: usize,
    last_success: u64,
    current: f32,
    ttl_ms: u64,
}

impl ReadingFilter {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            history: [f32::NAN; HISTORY_SIZE],
            cursor: 0,
            count: 0,
            last_success: 0,
            current: f32::NAN,
            ttl_ms,
        }
    }

    pub fn update(&mut self, reading: f32, now_ms: u64) {
        if reading == POWER_ON_RESET_READING || reading.is_nan() {
            return;
        }
        self.history[self.cursor] = reading;
        self.cursor = (self.cursor + 1) % HISTORY_SIZE;
        self.last_success = now_ms;
        if self.count < HISTORY_SIZE {
            self.count += 1;
        }

        if self.count == MIN_READINGS {
            self.current = reading;
        } else if self.count > MIN_READINGS && reading != self.current {
            let difference = self.current - reading;
            if difference.abs() > STEP_THRESHOLD {
                self.current = reading;
            } else if let Some(average) = self.average() {
                if (average - reading).abs() < AVERAGE_WINDOW {
                    self.current = reading;
                }
            }
        }
    }

    /// Current value, or NaN once nothing has been read for the TTL.
    /// Going stale forgets the history.
    pub fn temperature(&mut self, now_ms: u64) -> f32 {
        if self.count > 0 && now_ms.saturating_sub(self.last_success) > self.ttl_ms {
            self.count = 0;
            self.history = [f32::NAN; HISTORY_SIZE];
            self.current = f32::NAN;
        }
        self.current
    }

    pub fn average(&self) -> Option<f32> {
        if self.count < MIN_READINGS {
            return None;
        }
        let sum: f32 = (1..=self.count)
            .map(|back| self.history[(self.cursor + HISTORY_SIZE - back) % HISTORY_SIZE])
            .sum();
        Some(sum / self.count as f32)
    }
}
