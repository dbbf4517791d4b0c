//! Update a slot from the external image store.
//!
//! The sequence, driven by a single command:
//!
//! 1. [`Updater::pre_update_checks`]: open a flash session, bring up the
//!    bus, identify the external part, mount its filesystem.  Nothing has
//!    been touched yet; on failure simply start again here.
//! 2. [`Updater::update`]: check the image fits, erase the slot, stream the
//!    image in, zero the rest of the slot.
//! 3. [`Updater::post_update_checks`]: close the session.
//!
//! There is no activation step.  The selector finds the new image on the
//! next boot, provided it validates.
//!
//! Known gaps: the freshly written image is not CRC checked here and its burn
//! number is not bumped; a failure after the erase leaves the slot erased or
//! partially written, with no rollback.  [`crate::inspect`] can be used to
//! look at the slot afterwards.

use embedded_hal::delay::DelayNs;
use slot_layout::SlotId;
use storage::{ExternalFlash, FlashController, ReadOnlyFs, RoFile, GRANULE};

use crate::{
    flash::FlashEngine,
    log::{error, info},
    Error, Result,
};

/// Bytes moved from the image file to program memory per write.
pub const TRANSFER_BUFFER_SIZE: usize = 32 * 1024;

const _: () = assert!(TRANSFER_BUFFER_SIZE % GRANULE == 0);

#[derive(Debug, Copy, Clone)]
pub struct UpdateConfig {
    /// Where the staged image lives on the external filesystem.
    pub image_path: &'static str,
    /// JEDEC manufacturer expected from the external part.
    pub manufacturer: u8,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        UpdateConfig {
            image_path: "/firmware.bin",
            manufacturer: 0x01,
        }
    }
}

pub struct Updater<'a, C, D, X, F> {
    engine: FlashEngine<'a, C, D>,
    external: X,
    fs: F,
    config: UpdateConfig,
}

impl<'a, C, D, X, F> Updater<'a, C, D, X, F>
where
    C: FlashController,
    D: DelayNs,
    X: ExternalFlash,
    F: ReadOnlyFs,
{
    pub fn new(engine: FlashEngine<'a, C, D>, external: X, fs: F, config: UpdateConfig) -> Self {
        Updater {
            engine,
            external,
            fs,
            config,
        }
    }

    pub fn engine(&self) -> &FlashEngine<'a, C, D> {
        &self.engine
    }

    pub fn into_parts(self) -> (FlashEngine<'a, C, D>, X, F) {
        (self.engine, self.external, self.fs)
    }

    /// Run the whole sequence for `slot`.
    pub fn run(&mut self, slot: u8) -> Result<()> {
        self.pre_update_checks(slot)?;
        self.update(slot)?;
        self.post_update_checks(slot)
    }

    pub fn pre_update_checks(&mut self, slot: u8) -> Result<()> {
        self.engine.init(slot)?;
        if let Err(e) = self.bring_up_storage() {
            error!("pre-update checks failed: {:?}", e);
            self.engine.deinit();
            return Err(e);
        }
        info!("ready to update slot {}", slot);
        Ok(())
    }

    fn bring_up_storage(&mut self) -> Result<()> {
        self.external.bring_up()?;
        let id = self.external.read_id()?;
        if id.manufacturer != self.config.manufacturer {
            return Err(Error::UnknownDevice(id.manufacturer));
        }
        self.fs.mount().map_err(|_| Error::Mount)
    }

    /// Replace the contents of `slot` with the staged image.  On failure the
    /// flash session is closed before returning.
    pub fn update(&mut self, slot: u8) -> Result<()> {
        let result = SlotId::new(slot)
            .filter(|s| s.is_boot_candidate())
            .ok_or(Error::InvalidSlot(slot))
            .and_then(|slot| self.install(slot));
        if let Err(e) = result {
            error!("update of slot {} failed: {:?}", slot, e);
            self.engine.deinit();
        }
        result
    }

    fn install(&mut self, slot: SlotId) -> Result<()> {
        let region = slot.region();

        let mut file = self.fs.open(self.config.image_path).map_err(|e| match e {
            storage::Error::NotFound => Error::ImageNotFound,
            other => Error::Storage(other),
        })?;
        let mut buffer = [0u8; TRANSFER_BUFFER_SIZE];
        // The file is closed whatever happens; the first error wins.
        let copied = self.copy_image(slot, &mut file, &mut buffer);
        let closed = file.close();
        let mut addr = copied?;
        closed?;

        // Erased but unwritten flash has invalid ECC and would fault when read.
        buffer.fill(0);
        while addr < region.end() {
            let todo = ((region.end() - addr) as usize).min(buffer.len());
            self.engine.write(&mut addr, &buffer[..todo])?;
        }
        Ok(())
    }

    /// Erase the slot and stream `file` into it.  Returns the first address
    /// past the image.
    fn copy_image(&mut self, slot: SlotId, file: &mut F::File, buffer: &mut [u8]) -> Result<u32> {
        let region = slot.region();
        let size = file.size();
        if size > region.size as usize {
            return Err(Error::ImageTooLarge {
                size,
                capacity: region.size,
            });
        }

        self.engine.erase_slot(slot.number())?;

        let mut addr = region.base;
        let mut copied = 0;
        while copied < size {
            let want = (size - copied).min(buffer.len());
            let got = fill(file, &mut buffer[..want])?;
            if got < want {
                return Err(Error::ShortRead {
                    expected: size,
                    got: copied + got,
                });
            }
            // Only the final chunk can end part way through a granule.
            let padded = got.next_multiple_of(GRANULE);
            buffer[got..padded].fill(0);
            self.engine.write(&mut addr, &buffer[..padded])?;
            copied += got;
        }
        info!("wrote {} image bytes to slot {}", size, slot.number());
        Ok(addr)
    }

    pub fn post_update_checks(&mut self, slot: u8) -> Result<()> {
        self.engine.deinit();
        info!("slot {} updated", slot);
        Ok(())
    }
}

/// Read until `buf` is full or the file ends.
fn fill<R: RoFile>(file: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.read(&mut buf[pos..])?;
        if n == 0 {
            break;
        }
        pos += n;
    }
    Ok(pos)
}
