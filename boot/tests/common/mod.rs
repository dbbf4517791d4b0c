// Shared scaffolding for the scenario tests.

#![allow(dead_code)]

use std::cell::Cell;

use simflash::{styles::Timing, SimBank, SimController, SimDelay};
use slotboot::{EngineConfig, FaultLatch, FlashEngine, Indicator};

/// Counts indicator pulses.
pub struct Pulses<'a>(pub &'a Cell<usize>);

impl Indicator for Pulses<'_> {
    fn pulse(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

pub type SimEngine<'l, 'b, 'a> = FlashEngine<'l, SimController<'b, 'a>, SimDelay>;

pub fn engine<'l, 'b, 'a>(
    bank: &'b SimBank<'a>,
    latch: &'l FaultLatch,
    timing: Timing,
) -> SimEngine<'l, 'b, 'a> {
    engine_with(SimController::new(bank, timing), latch, EngineConfig::default())
}

pub fn engine_with<'l, 'b, 'a>(
    ctrl: SimController<'b, 'a>,
    latch: &'l FaultLatch,
    config: EngineConfig,
) -> SimEngine<'l, 'b, 'a> {
    FlashEngine::new(ctrl, SimDelay::default(), latch, config)
}
