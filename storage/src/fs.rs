//! Read-only filesystem holding staged images.

use crate::Result;

pub trait ReadOnlyFs {
    type File: RoFile;

    fn mount(&mut self) -> Result<()>;
    fn open(&mut self, path: &str) -> Result<Self::File>;
}

/// An open file.
pub trait RoFile {
    /// Size of the file, in bytes.
    fn size(&self) -> usize;

    /// Read from the current position.  Returns the number of bytes read,
    /// which is 0 at end of file and may be short before that.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn seek(&mut self, pos: usize) -> Result<()>;

    fn close(self) -> Result<()>;
}
