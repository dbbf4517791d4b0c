//! Internal program memory and its flash controller.
//!
//! Reads of program memory are plain loads.  When a load hits an
//! uncorrectable ECC error the CPU takes a data abort, and the abort path
//! decides (via an [`AbortSink`]) whether execution may resume.  The wrapper
//! records the failing address in a fault-address register which then stays
//! frozen until it is read, so a second fault goes unreported until somebody
//! drains it.

use bitflags::bitflags;

use crate::Result;

/// Minimum programming unit, from the width of an ECC-protected bank word.
pub const GRANULE: usize = 16;

/// Access to the ECC fault-address register.
pub trait FaultCapture {
    /// Read the uncorrectable-error address register.  Reading it unfreezes
    /// capture of the next fault.
    fn drain_fault_address(&self) -> u32;
}

/// Called from the data abort path.
pub trait AbortSink {
    /// Record a fault at `addr`.  Returns true if execution may continue past
    /// the faulting load, false if the fault is unrecoverable.
    fn data_abort(&self, addr: u32) -> bool;
}

/// Memory mapped, read-only view of program memory.
pub trait ProgramMemory: FaultCapture {
    /// Copy out `bytes.len()` bytes starting at absolute address `addr`.  A
    /// faulting read still completes; the fault is only visible through the
    /// abort path.
    fn read(&self, addr: u32, bytes: &mut [u8]);

    fn read_u32(&self, addr: u32) -> u32 {
        let mut word = [0u8; 4];
        self.read(addr, &mut word);
        u32::from_ne_bytes(word)
    }
}

bitflags! {
    /// Flash module status, as reported by the controller's state machine.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct FsmStatus: u32 {
        const SECTOR_LOCKED = 1 << 0;
        const VOLTAGE = 1 << 3;
        const COMMAND_FAILED = 1 << 4;
        const INVALID_DATA = 1 << 5;
        const BUSY = 1 << 8;
        const ERASE_VERIFY = 1 << 10;
        const PROGRAM_VERIFY = 1 << 12;
        const ILLEGAL_ADDRESS = 1 << 14;
    }
}

impl FsmStatus {
    const FAILURES: FsmStatus = FsmStatus::SECTOR_LOCKED
        .union(FsmStatus::VOLTAGE)
        .union(FsmStatus::COMMAND_FAILED)
        .union(FsmStatus::INVALID_DATA)
        .union(FsmStatus::ERASE_VERIFY)
        .union(FsmStatus::PROGRAM_VERIFY)
        .union(FsmStatus::ILLEGAL_ADDRESS);

    pub fn busy(self) -> bool {
        self.contains(FsmStatus::BUSY)
    }

    /// Did the last completed command report an error.
    pub fn failed(self) -> bool {
        self.intersects(Self::FAILURES)
    }
}

/// Set of bank 0 sectors open for erase and program, one bit per sector.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectorMask(pub u16);

impl SectorMask {
    pub const fn contains(self, sector: u8) -> bool {
        sector < 16 && self.0 & (1 << sector) != 0
    }

    /// Enabled sector numbers, lowest first.
    pub fn sectors(self) -> impl Iterator<Item = u8> {
        (0..16u8).filter(move |&s| self.contains(s))
    }
}

/// The internal flash controller.
///
/// Each `issue_*` call starts a command on the controller's state machine;
/// completion is observed by polling [`FlashController::poll_status`] until
/// it stops reporting busy.  None of these calls wait.
pub trait FlashController: FaultCapture {
    /// Enable or disable ECC error detection on program memory reads.
    fn set_ecc_detection(&mut self, enabled: bool);

    /// Set up wait states and select bank 0 as the active bank.
    fn init_bank(&mut self) -> Result<()>;

    /// Unprotect exactly the sectors in `mask`; all others become protected.
    fn enable_sectors(&mut self, mask: SectorMask) -> Result<()>;

    fn poll_status(&mut self) -> FsmStatus;

    /// Start an erase of the sector beginning at `sector_base`.
    fn issue_erase(&mut self, sector_base: u32) -> Result<()>;

    /// Start programming one granule at `addr`, with ECC generated by the
    /// controller.  `data` is exactly [`GRANULE`] bytes.
    fn issue_program(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Verify `[addr, addr + len)` reads as erased.  Completes before
    /// returning.  A controller without a blank-check command may read the
    /// range back instead; detection is off for the whole session, so the
    /// reads cannot fault.
    fn issue_blank_check(&mut self, addr: u32, len: u32) -> Result<()>;

    /// Read back program memory.  Detection state is whatever
    /// `set_ecc_detection` last selected.
    fn read(&mut self, addr: u32, bytes: &mut [u8]);

    /// Discard anything the read pipeline or prefetch buffers hold.
    fn flush_pipeline(&mut self);

    /// Suspend the running state machine command.
    fn suspend_fsm(&mut self);

    /// Issue the clear-more command, resetting the state machine's status.
    fn clear_more(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_failures() {
        assert!(!FsmStatus::empty().failed());
        assert!(!FsmStatus::BUSY.failed());
        assert!(FsmStatus::BUSY.busy());
        assert!((FsmStatus::BUSY | FsmStatus::PROGRAM_VERIFY).failed());
        assert!(FsmStatus::INVALID_DATA.failed());
    }

    #[test]
    fn sector_mask() {
        let mask = SectorMask(0b1_1000);
        assert!(mask.contains(3));
        assert!(mask.contains(4));
        assert!(!mask.contains(5));
        assert!(!mask.contains(16));
        let v: Vec<u8> = mask.sectors().collect();
        assert_eq!(v, [3, 4]);
    }
}
