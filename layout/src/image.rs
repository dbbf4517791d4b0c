//! Image descriptor
//!
//! Every slot starts with a fixed descriptor, laid out as follows (fixed width
//! fields, no padding, target byte order):
//!
//! ```text
//! offset  0: ImageHeader { burn_number, magic, size, crc32 }           (16 B)
//! offset 16: Entrypoint  { magic, flash_addr, jump_instr, reserved }   (16 B)
//! offset 32: InfoBlock   { magic, version[4], githash, platform,
//!                          target, flags, reserved[16] }               (32 B)
//! ```
//!
//! The CRC covers exactly `size` bytes, starting at the entrypoint.  The info
//! block is descriptive only and plays no part in deciding whether a slot can
//! boot.

use core::mem::size_of;

use crc::{Crc, Digest, CRC_32_ISO_HDLC};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Marks the start of a programmed image.
pub const HEADER_MAGIC: u32 = 0x5ab0_0710;

/// Marks a linked entrypoint record.
pub const ENTRYPOINT_MAGIC: u32 = 0xe7a7_0ce5;

/// Marks a populated info block.
pub const INFO_MAGIC: u32 = 0x1f0b_10c5;

/// Seed for the image CRC.
pub const CRC_SEED: u32 = 0xffff_ffff;

/// CRC-32 (ISO-HDLC polynomial) used for image integrity.
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const HEADER_OFFSET: u32 = 0;
pub const ENTRYPOINT_OFFSET: u32 = HEADER_OFFSET + size_of::<ImageHeader>() as u32;
pub const INFO_OFFSET: u32 = ENTRYPOINT_OFFSET + size_of::<Entrypoint>() as u32;

/// Total size of the descriptor at the start of a slot.
pub const DESCRIPTOR_SIZE: u32 = INFO_OFFSET + size_of::<InfoBlock>() as u32;

/// Start a streamed image CRC.
pub fn crc_digest() -> Digest<'static, u32> {
    CRC32.digest_with_initial(CRC_SEED)
}

/// CRC of a complete span held in memory.
pub fn image_crc(span: &[u8]) -> u32 {
    let mut digest = crc_digest();
    digest.update(span);
    digest.finalize()
}

/// The first thing in every slot.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct ImageHeader {
    /// Recency counter.  Carried by the format, not consulted by the selector.
    pub burn_number: u32,
    /// Must be [`HEADER_MAGIC`].
    pub magic: u32,
    /// Number of bytes, starting at the entrypoint, covered by `crc32`.
    pub size: u32,
    pub crc32: u32,
}

impl ImageHeader {
    /// Byte offset of the magic within the header.
    pub const MAGIC_OFFSET: u32 = 4;

    pub fn magic_ok(&self) -> bool {
        self.magic == HEADER_MAGIC
    }

    /// Does the CRC span stay within a slot of `slot_size` bytes.
    pub fn span_fits(&self, slot_size: u32) -> bool {
        slot_size
            .checked_sub(ENTRYPOINT_OFFSET)
            .is_some_and(|room| self.size <= room)
    }
}

/// Immediately follows the header.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct Entrypoint {
    /// Must be [`ENTRYPOINT_MAGIC`].
    pub magic: u32,
    /// The address the image was linked for.  Must equal the slot's base.
    pub flash_addr: u32,
    /// Address of the first instruction.
    pub jump_instr: u32,
    pub reserved: u32,
}

impl Entrypoint {
    /// A mis-linked image carries some other slot's address here.
    pub fn matches(&self, slot_base: u32) -> bool {
        self.magic == ENTRYPOINT_MAGIC && self.flash_addr == slot_base
    }
}

/// Build description.  Not required for boot validity.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct InfoBlock {
    /// Must be [`INFO_MAGIC`] for the rest of the block to mean anything.
    pub magic: u32,
    /// major, minor, patch, build.
    pub version: [u8; 4],
    pub githash: u32,
    pub platform: u8,
    pub target: u8,
    pub flags: u16,
    pub reserved: [u8; 16],
}

impl InfoBlock {
    pub fn magic_ok(&self) -> bool {
        self.magic == INFO_MAGIC
    }
}

const _: () = assert!(size_of::<ImageHeader>() == 16);
const _: () = assert!(size_of::<Entrypoint>() == 16);
const _: () = assert!(size_of::<InfoBlock>() == 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets() {
        assert_eq!(ENTRYPOINT_OFFSET, 16);
        assert_eq!(INFO_OFFSET, 32);
        assert_eq!(DESCRIPTOR_SIZE, 64);
    }

    #[test]
    fn header_bytes() {
        let hdr = ImageHeader {
            burn_number: 7,
            magic: HEADER_MAGIC,
            size: 0x100,
            crc32: 0xdead_beef,
        };
        let raw = hdr.as_bytes();
        assert_eq!(&raw[4..8], &HEADER_MAGIC.to_ne_bytes());
        assert_eq!(ImageHeader::read_from_bytes(raw).unwrap(), hdr);
    }

    #[test]
    fn streamed_crc_matches_oneshot() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let mut digest = crc_digest();
        for chunk in data.chunks(33) {
            digest.update(chunk);
        }
        assert_eq!(digest.finalize(), image_crc(&data));
        // Standard check value for CRC-32/ISO-HDLC.
        assert_eq!(image_crc(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn span_limits() {
        let mut hdr = ImageHeader {
            size: 0x27ff0,
            ..Default::default()
        };
        assert!(hdr.span_fits(0x28000));
        hdr.size += 1;
        assert!(!hdr.span_fits(0x28000));
        assert!(!hdr.span_fits(8));
    }

    #[test]
    fn entrypoint_checks_base() {
        let ep = Entrypoint {
            magic: ENTRYPOINT_MAGIC,
            flash_addr: 0x18000,
            jump_instr: 0x18020,
            reserved: 0,
        };
        assert!(ep.matches(0x18000));
        assert!(!ep.matches(0x40000));
        let bad = Entrypoint { magic: 0, ..ep };
        assert!(!bad.matches(0x18000));
    }
}
