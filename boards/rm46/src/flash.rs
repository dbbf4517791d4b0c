//! F021 flash driver.
//!
//! Drives the flash state machine directly through the wrapper registers
//! rather than through a vendor library.  Only bank 0 is handled, and only
//! the operations the boot and update paths need.  ECC is generated by the
//! wrapper as data is programmed.

use core::ptr;

use slot_layout::PROGRAM_MEMORY_SIZE;
use storage::{
    Error, FaultCapture, FlashController, FsmStatus, ProgramMemory, Result, SectorMask, GRANULE,
};

use crate::regs::{self, Mmio};

fn in_bank(addr: u32, len: usize) -> bool {
    (addr as usize)
        .checked_add(len)
        .is_some_and(|end| end <= PROGRAM_MEMORY_SIZE as usize)
}

/// Copy out of the memory mapped bank.  Anything outside it reads as erased.
fn load(addr: u32, bytes: &mut [u8]) {
    if !in_bank(addr, bytes.len()) {
        bytes.fill(0xff);
        return;
    }
    for (i, byte) in bytes.iter_mut().enumerate() {
        // SAFETY: bank 0 is mapped from address 0 and checked above.  A load
        // may take a data abort, which the abort handler resumes from or
        // halts on.
        *byte = unsafe { ptr::read_volatile((addr as usize + i) as *const u8) };
    }
}

/// Program memory as seen by the CPU.
pub struct Bank0 {
    regs: Mmio,
}

impl Bank0 {
    /// # Safety
    ///
    /// Only one `Bank0` or [`F021`] may drain the fault address at a time.
    pub const unsafe fn new() -> Bank0 {
        Bank0 {
            regs: Mmio::new(regs::FLASH_WRAPPER),
        }
    }
}

impl FaultCapture for Bank0 {
    fn drain_fault_address(&self) -> u32 {
        self.regs.read(regs::FUNC_ERR_ADD)
    }
}

impl ProgramMemory for Bank0 {
    fn read(&self, addr: u32, bytes: &mut [u8]) {
        load(addr, bytes);
    }
}

/// The flash state machine.
pub struct F021 {
    regs: Mmio,
}

impl F021 {
    /// # Safety
    ///
    /// Exclusive use of the flash wrapper registers.
    pub const unsafe fn new() -> F021 {
        F021 {
            regs: Mmio::new(regs::FLASH_WRAPPER),
        }
    }

    fn command(&mut self, cmd: u32) {
        self.regs.write(regs::FSM_COMMAND, cmd);
        self.regs.write(regs::FSM_EXECUTE, regs::EXECUTE);
    }
}

impl FaultCapture for F021 {
    fn drain_fault_address(&self) -> u32 {
        self.regs.read(regs::FUNC_ERR_ADD)
    }
}

impl FlashController for F021 {
    fn set_ecc_detection(&mut self, enabled: bool) {
        let field = if enabled { regs::EDACEN_ON } else { regs::EDACEN_OFF };
        self.regs
            .modify(regs::FEDACCTRL1, |v| (v & !regs::EDACEN_MASK) | field);
    }

    fn init_bank(&mut self) -> Result<()> {
        if FsmStatus::from_bits_truncate(self.regs.read(regs::FMSTAT)).busy() {
            return Err(Error::Rejected);
        }
        // Bank 0.
        self.regs.write(regs::FMAC, 0);
        Ok(())
    }

    fn enable_sectors(&mut self, mask: SectorMask) -> Result<()> {
        self.regs.write(regs::FSM_WR_ENA, regs::WR_ENABLE);
        self.regs.write(regs::FBSE, u32::from(mask.0));
        self.regs.write(regs::FSM_WR_ENA, regs::WR_DISABLE);
        Ok(())
    }

    fn poll_status(&mut self) -> FsmStatus {
        FsmStatus::from_bits_truncate(self.regs.read(regs::FMSTAT))
    }

    fn issue_erase(&mut self, sector_base: u32) -> Result<()> {
        if !in_bank(sector_base, 1) {
            return Err(Error::OutOfBounds);
        }
        self.regs.write(regs::FSM_WR_ENA, regs::WR_ENABLE);
        self.regs.write(regs::FADDR, sector_base);
        self.command(regs::CMD_ERASE_SECTOR);
        Ok(())
    }

    fn issue_program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.len() != GRANULE || addr as usize % GRANULE != 0 {
            return Err(Error::NotAligned);
        }
        if !in_bank(addr, data.len()) {
            return Err(Error::OutOfBounds);
        }
        self.regs.write(regs::FSM_WR_ENA, regs::WR_ENABLE);
        self.regs.write(regs::FADDR, addr);
        for (i, word) in data.chunks_exact(4).enumerate() {
            let word = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
            self.regs.write(regs::FWPWRITE0 + 4 * i, word);
        }
        self.command(regs::CMD_PROGRAM);
        Ok(())
    }

    // The wrapper has no blank-check command of its own; read the range.
    fn issue_blank_check(&mut self, addr: u32, len: u32) -> Result<()> {
        if !in_bank(addr, len as usize) {
            return Err(Error::OutOfBounds);
        }
        let mut word = [0u8; 4];
        for offset in (0..len).step_by(4) {
            load(addr + offset, &mut word);
            if word != [0xff; 4] {
                return Err(Error::NotErased);
            }
        }
        Ok(())
    }

    fn read(&mut self, addr: u32, bytes: &mut [u8]) {
        load(addr, bytes);
    }

    fn flush_pipeline(&mut self) {
        // Rewriting the read control register drops any prefetched data.
        self.regs.modify(regs::FRDCNTL, |v| v);
    }

    fn suspend_fsm(&mut self) {
        self.regs.write(regs::FSM_EXECUTE, regs::SUSPEND_NOW);
    }

    fn clear_more(&mut self) {
        self.command(regs::CMD_CLEAR_MORE);
        self.regs.write(regs::FSM_WR_ENA, regs::WR_DISABLE);
    }
}
