//! A delay that only keeps count.

use embedded_hal::delay::DelayNs;

/// Records the total time asked for, and returns at once.
#[derive(Debug, Default, Copy, Clone)]
pub struct SimDelay {
    pub total_ns: u64,
}

impl SimDelay {
    pub fn total_us(&self) -> u64 {
        self.total_ns / 1_000
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
