//! Program memory map for the onboard computer.
//!
//! Internal program memory is split into a fixed set of slots, each holding
//! one complete firmware image.  Slot 0 holds the selector itself and is never
//! booted by it.  The remaining slots are candidates, probed in order.
//!
//! The image descriptor that starts every slot lives in [`image`].

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod image;

pub use image::{Entrypoint, ImageHeader, InfoBlock};

/// Number of slots in the memory map, including the selector's own slot.
pub const SLOT_COUNT: usize = 6;

/// Size of program memory bank 0.
pub const PROGRAM_MEMORY_SIZE: u32 = 0x14_0000;

/// A contiguous, statically addressed region of program memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotRegion {
    pub base: u32,
    pub size: u32,
}

impl SlotRegion {
    pub const fn new(base: u32, size: u32) -> SlotRegion {
        SlotRegion { base, size }
    }

    /// One past the last byte of the region.
    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    /// Does `[addr, addr + len)` lie entirely within this region.
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        let Ok(len) = u32::try_from(len) else {
            return false;
        };
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }
}

/// Slot 0: startup (selector), 1-2: boot images, 3: core application,
/// 4-5: application extensions.
pub static SLOT_TABLE: [SlotRegion; SLOT_COUNT] = [
    SlotRegion::new(0x0_0000, 0x0_8000),
    SlotRegion::new(0x0_8000, 0x0_8000),
    SlotRegion::new(0x1_0000, 0x0_8000),
    SlotRegion::new(0x1_8000, 0x2_8000),
    SlotRegion::new(0x4_0000, 0x4_0000),
    SlotRegion::new(0x8_0000, 0x4_0000),
];

/// Index of a slot in [`SLOT_TABLE`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotId(u8);

impl SlotId {
    /// The selector's own slot.
    pub const STARTUP: SlotId = SlotId(0);

    /// Returns `None` for numbers past the end of the table.
    pub const fn new(n: u8) -> Option<SlotId> {
        if (n as usize) < SLOT_COUNT {
            Some(SlotId(n))
        } else {
            None
        }
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Slot 0 is immutable and is never a boot candidate.
    pub const fn is_boot_candidate(self) -> bool {
        self.0 != 0
    }

    pub fn region(self) -> SlotRegion {
        SLOT_TABLE[self.index()]
    }

    /// All slots the selector will consider, in probe order.
    pub fn candidates() -> impl Iterator<Item = SlotId> {
        (1..SLOT_COUNT as u8).map(SlotId)
    }
}

/// One erase sector of program memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sector {
    pub index: u8,
    pub base: u32,
    pub size: u32,
}

impl Sector {
    const fn new(index: u8, base: u32, size: u32) -> Sector {
        Sector { index, base, size }
    }

    pub const fn end(&self) -> u32 {
        self.base + self.size
    }
}

/// Number of sectors in bank 0.
pub const SECTOR_COUNT: usize = 13;

/// Bank 0 sector geometry: four 32 KiB sectors followed by 128 KiB sectors.
pub static SECTORS: [Sector; SECTOR_COUNT] = [
    Sector::new(0, 0x0_0000, 0x0_8000),
    Sector::new(1, 0x0_8000, 0x0_8000),
    Sector::new(2, 0x1_0000, 0x0_8000),
    Sector::new(3, 0x1_8000, 0x0_8000),
    Sector::new(4, 0x2_0000, 0x2_0000),
    Sector::new(5, 0x4_0000, 0x2_0000),
    Sector::new(6, 0x6_0000, 0x2_0000),
    Sector::new(7, 0x8_0000, 0x2_0000),
    Sector::new(8, 0xa_0000, 0x2_0000),
    Sector::new(9, 0xc_0000, 0x2_0000),
    Sector::new(10, 0xe_0000, 0x2_0000),
    Sector::new(11, 0x10_0000, 0x2_0000),
    Sector::new(12, 0x12_0000, 0x2_0000),
];

/// Find the sector holding `addr`.
pub fn sector_at(addr: u32) -> Option<&'static Sector> {
    SECTORS.iter().find(|s| addr >= s.base && addr < s.end())
}
