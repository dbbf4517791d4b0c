//! Data abort fault latch.
//!
//! Reading a blank or damaged slot produces uncorrectable ECC errors, which
//! arrive as data aborts.  Normally such an abort is fatal.  While the latch is
//! armed non-fatal, the abort path records the fault here and resumes, so that
//! the code probing memory can notice afterwards and move on.
//!
//! The latch is a process-wide singleton ([`FaultLatch::global`]) because the
//! abort handler has no other way to find it.  Callers acknowledge a fault with
//! [`FaultLatch::clear`], exactly once per fault; clearing also reads the
//! hardware fault-address register, without which the hardware stops
//! capturing later faults.

use core::sync::atomic::{AtomicBool, Ordering};

use storage::{AbortSink, FaultCapture};

use crate::log::trace;

pub struct FaultLatch {
    fatal: AtomicBool,
    raised: AtomicBool,
}

static GLOBAL: FaultLatch = FaultLatch::new();

impl FaultLatch {
    /// A fresh latch: fatal, nothing raised.
    pub const fn new() -> FaultLatch {
        FaultLatch {
            fatal: AtomicBool::new(true),
            raised: AtomicBool::new(false),
        }
    }

    /// The latch the abort handler reports into.
    pub fn global() -> &'static FaultLatch {
        &GLOBAL
    }

    /// Clear the latch and let later faults be observed instead of halting.
    pub fn set_nonfatal<C: FaultCapture + ?Sized>(&self, capture: &C) {
        self.clear(capture);
        self.fatal.store(false, Ordering::SeqCst);
    }

    /// Any later fault is unrecoverable.
    pub fn set_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Has a fault occurred since the last clear.
    pub fn get(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Acknowledge a fault and drain the fault-address register.
    pub fn clear<C: FaultCapture + ?Sized>(&self, capture: &C) {
        self.raised.store(false, Ordering::SeqCst);
        let addr = capture.drain_fault_address();
        trace!("fault latch cleared, drained {:#x}", addr);
    }
}

impl Default for FaultLatch {
    fn default() -> Self {
        FaultLatch::new()
    }
}

impl AbortSink for FaultLatch {
    fn data_abort(&self, _addr: u32) -> bool {
        if self.is_fatal() {
            return false;
        }
        self.raised.store(true, Ordering::SeqCst);
        true
    }
}
