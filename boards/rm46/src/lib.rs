//! RM46-class Hercules board support.
//!
//! Binds the boot selector and flash engine to the real hardware: the F021
//! flash wrapper, the data abort vector, an LED on GIO port B and a spin
//! delay.  The startup code calls [`selector_main`] from reset with the
//! stacks set up.

#![cfg_attr(not(test), no_std)]

pub mod abort;
pub mod flash;
pub mod gio;
pub mod regs;

#[cfg(feature = "rtt")]
use defmt_rtt as _;

use slot_layout::SLOT_TABLE;
use slotboot::{
    selector::Blinker, BootTarget, EngineConfig, FaultLatch, FlashEngine, Handoff, Selector,
};

pub use flash::{Bank0, F021};
pub use gio::{CycleDelay, Led};

/// Spin loop iterations per microsecond at the default 160 MHz clock.
pub const LOOPS_PER_US: u32 = 40;

const LED_PIN: u8 = 1;
const LED_ON_US: u32 = 100_000;
const LED_OFF_US: u32 = 400_000;

/// Branch into the chosen image.
pub struct Jump;

impl Handoff for Jump {
    fn jump(self, target: BootTarget) -> ! {
        // SAFETY: the selector only produces targets from an image that was
        // linked for its slot and passed its CRC.
        let entry: extern "C" fn() -> ! = unsafe { core::mem::transmute(target.entry as usize) };
        entry()
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
fn disable_interrupts() {
    // SAFETY: masks IRQ and FIQ, nothing else.
    unsafe { core::arch::asm!("cpsid if", options(nostack)) };
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn disable_interrupts() {}

/// Reset entry for the boot selector.  Never returns: either an image is
/// started or the selector keeps cycling with the LED blinking.
pub fn selector_main() -> ! {
    disable_interrupts();

    // SAFETY: nothing else runs yet, so these are the only users of the
    // flash wrapper and the LED pin.
    let memory = unsafe { Bank0::new() };
    let led = unsafe { Led::new(regs::GIO_PORT_B, LED_PIN) };

    let blinker = Blinker::new(led, CycleDelay::new(LOOPS_PER_US), LED_ON_US, LED_OFF_US);
    Selector::new(&memory, FaultLatch::global(), &SLOT_TABLE, blinker).run(Jump)
}

/// The flash engine for the command path, wired to the global latch.
///
/// # Safety
///
/// The caller must be the only user of the flash wrapper while the engine
/// exists.
pub unsafe fn flash_engine(config: EngineConfig) -> FlashEngine<'static, F021, CycleDelay> {
    FlashEngine::new(F021::new(), CycleDelay::new(LOOPS_PER_US), FaultLatch::global(), config)
}

#[cfg(all(feature = "rtt", target_arch = "arm", target_os = "none"))]
mod critical {
    struct SingleCore;
    critical_section::set_impl!(SingleCore);

    const IRQ_MASKED: u32 = 1 << 7;

    unsafe impl critical_section::Impl for SingleCore {
        unsafe fn acquire() -> critical_section::RawRestoreState {
            let cpsr: u32;
            core::arch::asm!("mrs {}, cpsr", "cpsid i", out(reg) cpsr, options(nostack));
            cpsr
        }

        unsafe fn release(cpsr: critical_section::RawRestoreState) {
            if cpsr & IRQ_MASKED == 0 {
                core::arch::asm!("cpsie i", options(nostack));
            }
        }
    }
}
