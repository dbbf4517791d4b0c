//! Status LED and a busy-wait delay.

use core::convert::Infallible;

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, OutputPin},
};

use crate::regs::{self, Mmio};

/// One output pin of a GIO port.
pub struct Led {
    port: Mmio,
    bit: u32,
}

impl Led {
    /// # Safety
    ///
    /// `port` must be a GIO port base, and no one else may drive `pin`.
    pub unsafe fn new(port: usize, pin: u8) -> Led {
        let port = Mmio::new(port);
        let bit = 1 << pin;
        port.modify(regs::GIO_DIR, |v| v | bit);
        Led { port, bit }
    }
}

impl ErrorType for Led {
    type Error = Infallible;
}

impl OutputPin for Led {
    fn set_high(&mut self) -> Result<(), Infallible> {
        self.port.write(regs::GIO_DSET, self.bit);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.port.write(regs::GIO_DCLR, self.bit);
        Ok(())
    }
}

/// Spins for roughly the requested time.  Flash operations can stall the
/// bus a timer interrupt would need, so nothing better is available.
#[derive(Copy, Clone)]
pub struct CycleDelay {
    /// Loop iterations per microsecond at the running clock.
    loops_per_us: u32,
}

impl CycleDelay {
    pub const fn new(loops_per_us: u32) -> CycleDelay {
        CycleDelay { loops_per_us }
    }
}

impl DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        let loops = (u64::from(ns) * u64::from(self.loops_per_us)).div_ceil(1_000);
        for _ in 0..loops {
            core::hint::spin_loop();
        }
    }
}
