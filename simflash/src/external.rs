//! Simulated external NOR part.

use storage::{
    check_erase, check_read, check_write, BlockDevice, Error, ExternalFlash, JedecId, Result,
};

pub struct SimNor {
    data: Vec<u8>,
    id: JedecId,
    up: bool,
    /// Refuse to come out of reset.
    pub fail_bring_up: bool,
}

impl SimNor {
    pub const ERASE_SIZE: usize = 4096;
    pub const PAGE_SIZE: usize = 256;

    /// An erased part of `capacity` bytes.
    pub fn new(capacity: usize, manufacturer: u8) -> Self {
        SimNor {
            data: vec![0xff; capacity],
            id: JedecId {
                manufacturer,
                memory_type: 0x60,
                capacity: capacity.trailing_zeros() as u8,
            },
            up: false,
            fail_bring_up: false,
        }
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    fn ready(&self) -> Result<()> {
        if self.up {
            Ok(())
        } else {
            Err(Error::Bus)
        }
    }
}

impl BlockDevice for SimNor {
    fn read_size(&self) -> usize {
        1
    }

    fn write_size(&self) -> usize {
        Self::PAGE_SIZE
    }

    fn erase_size(&self) -> usize {
        Self::ERASE_SIZE
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, addr: u32, bytes: &mut [u8]) -> Result<()> {
        self.ready()?;
        check_read(self, addr, bytes.len())?;
        let start = addr as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.ready()?;
        check_write(self, addr, bytes.len())?;
        let start = addr as usize;
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, size: usize) -> Result<()> {
        self.ready()?;
        check_erase(self, addr, size)?;
        let start = addr as usize;
        self.data[start..start + size].fill(0xff);
        Ok(())
    }
}

impl ExternalFlash for SimNor {
    fn bring_up(&mut self) -> Result<()> {
        if self.fail_bring_up {
            return Err(Error::Timeout);
        }
        self.up = true;
        Ok(())
    }

    fn read_id(&mut self) -> Result<JedecId> {
        self.ready()?;
        Ok(self.id)
    }
}
