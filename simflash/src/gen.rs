//! Image generation.
//!
//! Builds complete slot images: descriptor followed by a pseudo-random body.
//! The body is reproducible from the seed, so a test can regenerate the
//! image it expects to find in flash.

use std::{fs, path::Path};

use anyhow::{anyhow, Result};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use slot_layout::{
    image::{
        image_crc, DESCRIPTOR_SIZE, ENTRYPOINT_MAGIC, ENTRYPOINT_OFFSET, HEADER_MAGIC, INFO_MAGIC,
    },
    Entrypoint, ImageHeader, InfoBlock, SlotId,
};
use zerocopy::IntoBytes;

pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub header: ImageHeader,
    pub entrypoint: Entrypoint,
}

impl GeneratedImage {
    /// Write the image out, as it would be staged on the external store.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }
}

pub struct GenBuilder {
    /// Slot base the image is laid out for.
    base: u32,
    /// Address written into the entrypoint.  Normally the base.
    linked_for: u32,
    /// Total size of the image file, descriptor included.
    size: usize,
    /// Seed for the PRNG
    seed: u64,
    burn_number: u32,
    /// First instruction, relative to the base.
    jump_offset: u32,
    version: [u8; 4],
    /// Override the CRC span recorded in the header.
    span: Option<u32>,
    bad_magic: bool,
    /// Byte to damage after the CRC has been computed.
    flip_bit: Option<usize>,
}

impl Default for GenBuilder {
    fn default() -> Self {
        let base = SlotId::new(1).map_or(0x8000, |s| s.region().base);
        GenBuilder {
            base,
            linked_for: base,
            size: 12_345,
            seed: 1,
            burn_number: 1,
            jump_offset: 0x20,
            version: [0, 1, 0, 0],
            span: None,
            bad_magic: false,
            flip_bit: None,
        }
    }
}

impl GenBuilder {
    /// Lay the image out for `slot`, and link it there.
    pub fn for_slot(&mut self, slot: u8) -> &mut Self {
        if let Some(slot) = SlotId::new(slot) {
            self.base = slot.region().base;
            self.linked_for = self.base;
        }
        self
    }

    /// Link for a different address than the one the image lands at.
    pub fn linked_for(&mut self, addr: u32) -> &mut Self {
        self.linked_for = addr;
        self
    }

    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn burn_number(&mut self, burn_number: u32) -> &mut Self {
        self.burn_number = burn_number;
        self
    }

    pub fn jump_offset(&mut self, offset: u32) -> &mut Self {
        self.jump_offset = offset;
        self
    }

    pub fn version(&mut self, version: [u8; 4]) -> &mut Self {
        self.version = version;
        self
    }

    pub fn span(&mut self, span: u32) -> &mut Self {
        self.span = Some(span);
        self
    }

    pub fn bad_magic(&mut self) -> &mut Self {
        self.bad_magic = true;
        self
    }

    pub fn flip_bit(&mut self, offset: usize) -> &mut Self {
        self.flip_bit = Some(offset);
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        if self.size < DESCRIPTOR_SIZE as usize {
            return Err(anyhow!("image of {} bytes has no room for a descriptor", self.size));
        }

        let mut data = vec![0u8; self.size];
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        rng.fill_bytes(&mut data[DESCRIPTOR_SIZE as usize..]);

        let entrypoint = Entrypoint {
            magic: ENTRYPOINT_MAGIC,
            flash_addr: self.linked_for,
            jump_instr: self.base + self.jump_offset,
            reserved: 0,
        };
        let info = InfoBlock {
            magic: INFO_MAGIC,
            version: self.version,
            githash: rng.next_u32(),
            platform: 1,
            target: 1,
            flags: 0,
            reserved: [0; 16],
        };
        let ep = ENTRYPOINT_OFFSET as usize;
        data[ep..ep + 16].copy_from_slice(entrypoint.as_bytes());
        data[ep + 16..DESCRIPTOR_SIZE as usize].copy_from_slice(info.as_bytes());

        let header = ImageHeader {
            burn_number: self.burn_number,
            magic: if self.bad_magic { !HEADER_MAGIC } else { HEADER_MAGIC },
            size: self.span.unwrap_or((self.size - ep) as u32),
            crc32: image_crc(&data[ep..]),
        };
        data[..ep].copy_from_slice(header.as_bytes());

        if let Some(offset) = self.flip_bit {
            let byte = data
                .get_mut(offset)
                .ok_or_else(|| anyhow!("bit flip at {} is past the end of the image", offset))?;
            *byte ^= 0x10;
        }

        Ok(GeneratedImage {
            data,
            header,
            entrypoint,
        })
    }
}

#[cfg(test)]
mod tester {
    use slot_layout::image::image_crc;
    use zerocopy::FromBytes;

    use super::*;

    #[test]
    fn test_gen() {
        let img = GenBuilder::default().for_slot(3).size(4096).build().unwrap();
        assert_eq!(img.data.len(), 4096);

        let header = ImageHeader::read_from_bytes(&img.data[..16]).unwrap();
        assert_eq!(header, img.header);
        assert!(header.magic_ok());
        assert_eq!(header.size, 4096 - 16);
        assert_eq!(image_crc(&img.data[16..]), header.crc32);

        assert!(img.entrypoint.matches(0x18000));
        assert_eq!(img.entrypoint.jump_instr, 0x18020);
    }

    #[test]
    fn reproducible() {
        let a = GenBuilder::default().seed(7).build().unwrap();
        let b = GenBuilder::default().seed(7).build().unwrap();
        let c = GenBuilder::default().seed(8).build().unwrap();
        assert_eq!(a.data, b.data);
        assert_ne!(a.data, c.data);
    }

    #[test]
    fn damage() {
        let img = GenBuilder::default().flip_bit(100).build().unwrap();
        assert_ne!(image_crc(&img.data[16..]), img.header.crc32);
        assert!(GenBuilder::default().size(10).build().is_err());
        assert!(GenBuilder::default().flip_bit(1 << 20).build().is_err());
    }
}
