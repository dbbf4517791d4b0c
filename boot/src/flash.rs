//! Internal flash programming engine.
//!
//! A programming session is bracketed by [`FlashEngine::init`] and
//! [`FlashEngine::deinit`].  Init turns off ECC fault detection for program
//! memory, because erasing leaves regions whose ECC is invalid and any stray
//! read of them would abort, and opens exactly the sectors backing one slot.
//! Deinit turns detection back on, drains whatever fault the session left
//! behind, and returns the fault latch to fatal.
//!
//! Every wait is a busy poll bounded by [`EngineConfig::poll_budget`]: a flash
//! operation can stall the bus that would deliver a timer interrupt, so there
//! is no clock to wait on.  A command that never finishes is abandoned with a
//! state machine reset (suspend, clear-more, pipeline flush).
//!
//! The engine holds no locks.  Only one caller may use it at a time.

use embedded_hal::delay::DelayNs;
use heapless::Vec;
use slot_layout::{SlotId, SECTORS, SLOT_COUNT};
use storage::{FlashController, FsmStatus, SectorMask, GRANULE};

use crate::{
    fault::FaultLatch,
    log::{debug, error, info, warn},
    Error, Result,
};

/// Sectors backing each slot.  Slot 0 is listed but never opened.
pub static SECTOR_MASKS: [SectorMask; SLOT_COUNT] = [
    SectorMask(0b0000_0000_0001),
    SectorMask(0b0000_0000_0010),
    SectorMask(0b0000_0000_0100),
    SectorMask(0b0000_0001_1000),
    SectorMask(0b0000_0110_0000),
    SectorMask(0b0001_1000_0000),
];

/// Most sector regions any slot spans.
pub const MAX_REGIONS: usize = 2;

#[derive(Debug, Copy, Clone)]
pub struct EngineConfig {
    /// Status polls before a command is declared hung.
    pub poll_budget: u32,
    /// Delay after erase or program, once the pipeline has been flushed.
    pub settle_us: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_budget: 1_000_000,
            settle_us: 1_000,
        }
    }
}

/// State of an open programming session.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashOpState {
    pub active_slot: SlotId,
    pub ecc_disabled: bool,
}

/// An erase sector belonging to a slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SectorRegion {
    pub base: u32,
    pub size: u32,
}

/// The sector regions backing `slot`, lowest address first.
pub fn sector_regions(slot: SlotId) -> Vec<SectorRegion, MAX_REGIONS> {
    let mut regions = Vec::new();
    for index in SECTOR_MASKS[slot.index()].sectors() {
        let Some(sector) = SECTORS.get(index as usize) else {
            break;
        };
        let region = SectorRegion {
            base: sector.base,
            size: sector.size,
        };
        if regions.push(region).is_err() {
            break;
        }
    }
    regions
}

/// A slot that may be written: in the table, and not the selector's own.
fn writable(slot: u8) -> Result<SlotId> {
    SlotId::new(slot)
        .filter(|s| s.is_boot_candidate())
        .ok_or(Error::InvalidSlot(slot))
}

pub struct FlashEngine<'a, C, D> {
    ctrl: C,
    delay: D,
    latch: &'a FaultLatch,
    config: EngineConfig,
    state: Option<FlashOpState>,
}

impl<'a, C: FlashController, D: DelayNs> FlashEngine<'a, C, D> {
    pub fn new(ctrl: C, delay: D, latch: &'a FaultLatch, config: EngineConfig) -> Self {
        FlashEngine {
            ctrl,
            delay,
            latch,
            config,
            state: None,
        }
    }

    pub fn state(&self) -> Option<FlashOpState> {
        self.state
    }

    pub fn controller(&self) -> &C {
        &self.ctrl
    }

    /// Give back the controller and delay.  Any open session is abandoned
    /// as is, so close it first.
    pub fn into_parts(self) -> (C, D) {
        (self.ctrl, self.delay)
    }

    /// Open a programming session on `slot`.
    pub fn init(&mut self, slot: u8) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::AlreadyActive);
        }
        let slot = writable(slot)?;

        self.ctrl.set_ecc_detection(false);
        self.state = Some(FlashOpState {
            active_slot: slot,
            ecc_disabled: true,
        });

        match self.bring_up(slot) {
            Ok(()) => {
                debug!("flash session open on slot {}", slot.number());
                Ok(())
            }
            Err(e) => {
                error!("flash init failed: {:?}", e);
                self.deinit();
                Err(e)
            }
        }
    }

    fn bring_up(&mut self, slot: SlotId) -> Result<()> {
        self.ctrl.init_bank().map_err(|_| Error::Init)?;
        self.ctrl
            .enable_sectors(SECTOR_MASKS[slot.index()])
            .map_err(|_| Error::Init)?;
        match self.wait_ready() {
            None => Err(Error::InitTimeout),
            Some(status) if status.failed() => Err(Error::Init),
            Some(_) => Ok(()),
        }
    }

    /// Erase every sector of `slot` and check that it reads blank.
    pub fn erase_slot(&mut self, slot: u8) -> Result<()> {
        let slot = self.session(slot)?;

        for region in sector_regions(slot) {
            info!("erasing sector at {:#x} ({:#x} bytes)", region.base, region.size);
            self.ctrl
                .issue_erase(region.base)
                .map_err(|_| Error::Erase(region.base))?;
            match self.wait_ready() {
                None => {
                    self.recover();
                    return Err(Error::EraseTimeout(region.base));
                }
                Some(status) if status.failed() => {
                    warn!("erase at {:#x} failed, status {:#x}", region.base, status.bits());
                    return Err(Error::Erase(region.base));
                }
                Some(_) => (),
            }
            self.ctrl
                .issue_blank_check(region.base, region.size)
                .map_err(|_| Error::BlankCheck(region.base))?;
        }

        self.settle();
        Ok(())
    }

    /// Program `data` at `*addr`, verifying each granule as it goes.  On
    /// success `*addr` has advanced past the data, so successive calls stream.
    /// The length must be a whole number of granules.
    pub fn write(&mut self, addr: &mut u32, data: &[u8]) -> Result<()> {
        if data.len() % GRANULE != 0 {
            return Err(Error::Unaligned(data.len() as u32));
        }
        let state = self.state.ok_or(Error::NotActive)?;
        if *addr % GRANULE as u32 != 0 {
            return Err(Error::Unaligned(*addr));
        }
        if !state.active_slot.region().contains(*addr, data.len()) {
            return Err(Error::OutOfRange(*addr));
        }

        for chunk in data.chunks_exact(GRANULE) {
            let target = *addr;
            self.ctrl
                .issue_program(target, chunk)
                .map_err(|_| Error::Write(target))?;
            match self.wait_ready() {
                None => {
                    self.recover();
                    return Err(Error::WriteTimeout(target));
                }
                Some(status) if status.failed() => {
                    warn!("program at {:#x} failed, status {:#x}", target, status.bits());
                    return Err(Error::Write(target));
                }
                Some(_) => (),
            }

            let mut readback = [0u8; GRANULE];
            self.ctrl.read(target, &mut readback);
            if readback[..] != *chunk {
                return Err(Error::Verify(target));
            }
            *addr += GRANULE as u32;
        }

        self.settle();
        Ok(())
    }

    /// Close the session and restore normal fault handling.  Must be the last
    /// engine call before the rest of the system relies on fatal faults
    /// again.  Harmless without an open session.
    pub fn deinit(&mut self) {
        self.latch.set_nonfatal(&self.ctrl);
        self.ctrl.set_ecc_detection(true);
        self.latch.clear(&self.ctrl);
        self.latch.set_fatal();
        if let Some(state) = self.state.take() {
            debug!("flash session closed on slot {}", state.active_slot.number());
        }
    }

    /// The open session's slot, which must be `slot`.
    fn session(&self, slot: u8) -> Result<SlotId> {
        let slot = writable(slot)?;
        match self.state {
            None => Err(Error::NotActive),
            Some(state) if state.active_slot != slot => Err(Error::WrongSlot(slot.number())),
            Some(_) => Ok(slot),
        }
    }

    /// Poll until the state machine is idle.  `None` if it never gets there.
    fn wait_ready(&mut self) -> Option<FsmStatus> {
        for _ in 0..self.config.poll_budget {
            let status = self.ctrl.poll_status();
            if !status.busy() {
                return Some(status);
            }
        }
        None
    }

    /// Abandon a hung command.
    fn recover(&mut self) {
        warn!("flash state machine hung, resetting");
        self.ctrl.suspend_fsm();
        self.ctrl.clear_more();
        self.ctrl.flush_pipeline();
    }

    fn settle(&mut self) {
        self.ctrl.flush_pipeline();
        self.delay.delay_us(self.config.settle_us);
    }
}
