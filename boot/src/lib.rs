//! Boot selection and in-field update for redundant firmware slots.
//!
//! At cold start the [`Selector`] walks the candidate slots, validating each
//! one's descriptor and CRC while the [`FaultLatch`] turns ECC aborts into
//! observable failures, and hands off to the first good image.  Later, on
//! command, the [`Updater`] drives the [`FlashEngine`] to re-flash a slot from
//! the external image store.  The selector picks the new image up on the next
//! boot.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod log;

pub mod fault;
pub mod flash;
pub mod selector;
pub mod update;

pub use fault::FaultLatch;
pub use flash::{EngineConfig, FlashEngine, FlashOpState};
pub use selector::{
    inspect, BootState, BootTarget, Handoff, Indicator, Rejection, Selector, SlotReport,
};
pub use update::{UpdateConfig, Updater};

pub type Result<T> = core::result::Result<T, Error>;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Slot 0, or past the end of the slot table.
    InvalidSlot(u8),
    /// Sector operation without a programming session.
    NotActive,
    AlreadyActive,
    /// Sector operation on a slot other than the one the session opened.
    WrongSlot(u8),
    /// Bank initialisation or sector enable refused.
    Init,
    InitTimeout,
    Erase(u32),
    EraseTimeout(u32),
    BlankCheck(u32),
    /// Length or address not a multiple of the programming granule.
    Unaligned(u32),
    OutOfRange(u32),
    Write(u32),
    WriteTimeout(u32),
    /// Read back after programming did not match the source.
    Verify(u32),
    /// Bus or external flash failure.
    Storage(storage::Error),
    /// The external part answered with an unexpected manufacturer.
    UnknownDevice(u8),
    Mount,
    ImageNotFound,
    ImageTooLarge { size: usize, capacity: u32 },
    ShortRead { expected: usize, got: usize },
}

/// Convert the storage error into our error type.
impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Storage(e)
    }
}

impl Error {
    /// Status code reported back to the command path.
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidSlot(_) => 0xb001_0001,
            Error::NotActive => 0xb001_0002,
            Error::AlreadyActive => 0xb001_0003,
            Error::WrongSlot(_) => 0xb001_0004,
            Error::Init => 0xb002_0001,
            Error::InitTimeout => 0xb002_0002,
            Error::Erase(_) => 0xb003_0001,
            Error::EraseTimeout(_) => 0xb003_0002,
            Error::BlankCheck(_) => 0xb003_0003,
            Error::Unaligned(_) => 0xb004_0001,
            Error::OutOfRange(_) => 0xb004_0002,
            Error::Write(_) => 0xb004_0003,
            Error::WriteTimeout(_) => 0xb004_0004,
            Error::Verify(_) => 0xb004_0005,
            Error::Storage(e) => 0xb005_0000 | storage_code(*e),
            Error::UnknownDevice(_) => 0xb005_0100,
            Error::Mount => 0xb005_0200,
            Error::ImageNotFound => 0xb005_0300,
            Error::ShortRead { .. } => 0xb005_0400,
            Error::ImageTooLarge { .. } => 0xb006_0001,
        }
    }
}

fn storage_code(e: storage::Error) -> u32 {
    match e {
        storage::Error::NotAligned => 1,
        storage::Error::OutOfBounds => 2,
        storage::Error::NotWritten => 3,
        storage::Error::NotErased => 4,
        storage::Error::Rejected => 5,
        storage::Error::Bus => 6,
        storage::Error::Timeout => 7,
        storage::Error::NotFound => 8,
        storage::Error::Io => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let all = [
            Error::InvalidSlot(0),
            Error::NotActive,
            Error::AlreadyActive,
            Error::WrongSlot(1),
            Error::Init,
            Error::InitTimeout,
            Error::Erase(0),
            Error::EraseTimeout(0),
            Error::BlankCheck(0),
            Error::Unaligned(0),
            Error::OutOfRange(0),
            Error::Write(0),
            Error::WriteTimeout(0),
            Error::Verify(0),
            Error::Storage(storage::Error::Bus),
            Error::Storage(storage::Error::Io),
            Error::UnknownDevice(0),
            Error::Mount,
            Error::ImageNotFound,
            Error::ShortRead { expected: 1, got: 0 },
            Error::ImageTooLarge { size: 1, capacity: 0 },
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code(), "{:?} vs {:?}", a, b);
            }
        }
    }
}
