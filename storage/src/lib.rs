//! Storage types.
//!
//! The boot and update logic never touches hardware directly.  Everything it
//! needs goes through the narrow interfaces here:
//!
//! - [`internal`]: program memory reads, the ECC fault-address register and
//!   the internal flash controller's state machine.
//! - [`BlockDevice`] / [`ExternalFlash`]: the slow external flash part, reached
//!   through the bus layer.
//! - [`fs`]: the read-only filesystem that stages incoming images.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod fs;
pub mod internal;

pub use fs::{ReadOnlyFs, RoFile};
pub use internal::{
    AbortSink, FaultCapture, FlashController, FsmStatus, ProgramMemory, SectorMask, GRANULE,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    NotAligned,
    OutOfBounds,
    NotWritten,
    NotErased,
    /// The controller refused a command outright.
    Rejected,
    /// Bus transaction failed or was not acknowledged.
    Bus,
    Timeout,
    NotFound,
    /// Filesystem level failure (corrupt metadata, bad handle).
    Io,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Block transfer interface to an external flash part.
pub trait BlockDevice {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    /// Write size (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size (alignment and size multiple).
    fn erase_size(&self) -> usize;
    fn capacity(&self) -> usize;

    fn read(&mut self, addr: u32, bytes: &mut [u8]) -> Result<()>;
    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()>;
    fn erase(&mut self, addr: u32, size: usize) -> Result<()>;
}

/// JEDEC identification, as returned by the part's ID read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JedecId {
    pub manufacturer: u8,
    pub memory_type: u8,
    pub capacity: u8,
}

/// An external flash part sitting behind a bus that must be brought up first.
pub trait ExternalFlash: BlockDevice {
    /// Power and configure the bus, and take the part out of reset.
    fn bring_up(&mut self) -> Result<()>;
    fn read_id(&mut self) -> Result<JedecId>;
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: BlockDevice>(dev: &T, addr: u32, length: usize) -> Result<()> {
    check_slice(dev, dev.read_size(), addr, length)
}

pub fn check_erase<T: BlockDevice>(dev: &T, addr: u32, size: usize) -> Result<()> {
    let addr = addr as usize;
    let end = addr.checked_add(size).ok_or(Error::OutOfBounds)?;
    if end > dev.capacity() {
        return Err(Error::OutOfBounds);
    }
    if addr % dev.erase_size() != 0 || size % dev.erase_size() != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_write<T: BlockDevice>(dev: &T, addr: u32, length: usize) -> Result<()> {
    check_slice(dev, dev.write_size(), addr, length)
}

pub fn check_slice<T: BlockDevice>(dev: &T, align: usize, addr: u32, length: usize) -> Result<()> {
    let offset = addr as usize;
    if length > dev.capacity() || offset > dev.capacity() - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Geometry;

    impl BlockDevice for Geometry {
        fn read_size(&self) -> usize {
            1
        }
        fn write_size(&self) -> usize {
            256
        }
        fn erase_size(&self) -> usize {
            4096
        }
        fn capacity(&self) -> usize {
            64 * 1024
        }
        fn read(&mut self, _addr: u32, _bytes: &mut [u8]) -> Result<()> {
            unimplemented!()
        }
        fn write(&mut self, _addr: u32, _bytes: &[u8]) -> Result<()> {
            unimplemented!()
        }
        fn erase(&mut self, _addr: u32, _size: usize) -> Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn bounds() {
        let dev = Geometry;
        assert_eq!(check_read(&dev, 0xffff, 1), Ok(()));
        assert_eq!(check_read(&dev, 0xffff, 2), Err(Error::OutOfBounds));
        assert_eq!(check_write(&dev, 0x100, 0x100), Ok(()));
        assert_eq!(check_write(&dev, 0x101, 0x100), Err(Error::NotAligned));
        assert_eq!(check_erase(&dev, 0x1000, 0x2000), Ok(()));
        assert_eq!(check_erase(&dev, 0x1000, 0x100), Err(Error::NotAligned));
        assert_eq!(check_erase(&dev, 0xf000, 0x2000), Err(Error::OutOfBounds));
    }
}
