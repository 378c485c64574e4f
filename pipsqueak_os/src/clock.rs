// Wall clock (unix seconds, settable) plus a monotonic millisecond counter.
//
// A freshly booted board knows nothing about the date, so the wall clock
// starts at the epoch and is only corrected by a trusted server timestamp.

#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

pub trait Clock: Send {
    /// Seconds since the unix epoch as far as the device knows.
    fn now(&self) -> u32;
    fn set(&mut self, unix_secs: u32);
    /// Milliseconds since boot; never jumps.
    fn millis(&self) -> u64;
}

#[inline]
fn wall(offset: i64, millis: u64) -> u32 {
    (offset + (millis / 1000) as i64).clamp(0, u32::MAX as i64) as u32
}

pub struct SystemClock {
    boot: Instant,
    offset: i64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { boot: Instant::now(), offset: 0 }
    }

    /// Human-readable wall time, for logs.
    pub fn describe(secs: u32) -> String {
        DateTime::<Utc>::from_timestamp(secs as i64, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| secs.to_string())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        wall(self.offset, self.millis())
    }

    fn set(&mut self, unix_secs: u32) {
        self.offset = unix_secs as i64 - (self.millis() / 1000) as i64;
    }

    fn millis(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock; clones share the same time.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct ManualClock {
    offset: Arc<AtomicI64>,
    millis: Arc<AtomicU64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> u32 {
        wall(self.offset.load(Ordering::SeqCst), self.millis())
    }

    fn set(&mut self, unix_secs: u32) {
        let since_boot = (self.millis() / 1000) as i64;
        self.offset.store(unix_secs as i64 - since_boot, Ordering::SeqCst);
    }

    fn millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
