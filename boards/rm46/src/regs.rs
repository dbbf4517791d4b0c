//! Raw register access.

use core::ptr;

/// A block of 32-bit memory mapped registers.
#[derive(Copy, Clone)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the start of a register block that stays mapped for the
    /// life of the program, and nothing else may drive the same registers.
    pub const unsafe fn new(base: usize) -> Mmio {
        Mmio { base }
    }

    pub fn read(&self, offset: usize) -> u32 {
        // SAFETY: in range of the block promised to `new`.
        unsafe { ptr::read_volatile((self.base + offset) as *const u32) }
    }

    pub fn write(&self, offset: usize, value: u32) {
        // SAFETY: as for `read`.
        unsafe { ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    pub fn modify<F: FnOnce(u32) -> u32>(&self, offset: usize, f: F) {
        let value = self.read(offset);
        self.write(offset, f(value));
    }
}

/// F021 flash module wrapper.
pub const FLASH_WRAPPER: usize = 0xfff8_7000;

pub const FRDCNTL: usize = 0x000;
pub const FEDACCTRL1: usize = 0x008;
/// Uncorrectable error address.  Frozen after an error until read.
pub const FUNC_ERR_ADD: usize = 0x020;
/// Bank sector enable.
pub const FBSE: usize = 0x034;
pub const FMAC: usize = 0x050;
pub const FMSTAT: usize = 0x054;
pub const FADDR: usize = 0x110;
/// First of the write data latches.  The next three follow at 4 byte steps.
pub const FWPWRITE0: usize = 0x120;
pub const FSM_WR_ENA: usize = 0x288;
pub const FSM_COMMAND: usize = 0x20c;
pub const FSM_EXECUTE: usize = 0x2b4;

/// ECC detection enable field of FEDACCTRL1.
pub const EDACEN_MASK: u32 = 0xf;
pub const EDACEN_ON: u32 = 0xa;
pub const EDACEN_OFF: u32 = 0x5;

pub const WR_ENABLE: u32 = 0x5;
pub const WR_DISABLE: u32 = 0x2;

pub const EXECUTE: u32 = 0x15;
pub const SUSPEND_NOW: u32 = 0x5 << 16;

pub const CMD_PROGRAM: u32 = 0x02;
pub const CMD_ERASE_SECTOR: u32 = 0x06;
pub const CMD_CLEAR_MORE: u32 = 0x18;

/// General purpose I/O.
pub const GIO_PORT_B: usize = 0xfff7_bc54;

// Offsets within a port.
pub const GIO_DIR: usize = 0x00;
pub const GIO_DSET: usize = 0x0c;
pub const GIO_DCLR: usize = 0x10;
