//! Simulated program memory bank and its controller.

use std::cell::{Cell, RefCell};

use slot_layout::{sector_at, PROGRAM_MEMORY_SIZE};
use storage::{
    AbortSink, Error, FaultCapture, FlashController, FsmStatus, ProgramMemory, Result, SectorMask,
    GRANULE,
};

use crate::styles::Timing;

/// ECC state of one granule.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Ecc {
    /// Programmed; the check bits match the data.
    Valid,
    /// Erased or damaged.  Reads with detection enabled abort.
    Invalid,
}

/// Program memory bank 0.
pub struct SimBank<'a> {
    mem: RefCell<Vec<u8>>,
    ecc: RefCell<Vec<Ecc>>,
    detection: Cell<bool>,
    /// Fault-address register.  `Some` means frozen until drained.
    fault_addr: Cell<Option<u32>>,
    sink: Cell<Option<&'a dyn AbortSink>>,
    bytes_read: Cell<usize>,
    aborts: Cell<usize>,
}

impl<'a> SimBank<'a> {
    /// A bank straight from the factory: erased, ECC invalid everywhere.
    pub fn new() -> Self {
        let size = PROGRAM_MEMORY_SIZE as usize;
        SimBank {
            mem: RefCell::new(vec![0xff; size]),
            ecc: RefCell::new(vec![Ecc::Invalid; size / GRANULE]),
            detection: Cell::new(true),
            fault_addr: Cell::new(None),
            sink: Cell::new(None),
            bytes_read: Cell::new(0),
            aborts: Cell::new(0),
        }
    }

    /// Route data aborts to `sink`.  Without one, any abort is fatal.
    pub fn connect(&self, sink: &'a dyn AbortSink) {
        self.sink.set(Some(sink));
    }

    /// Place `data` at `addr` as if programmed, bypassing the controller.
    pub fn install(&self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        self.mem.borrow_mut()[start..start + data.len()].copy_from_slice(data);
        self.mark(addr, data.len(), Ecc::Valid);
    }

    /// Overwrite bytes without disturbing their ECC state.
    pub fn poke(&self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        self.mem.borrow_mut()[start..start + data.len()].copy_from_slice(data);
    }

    /// Damage the check bits of every granule touching the range.
    pub fn corrupt(&self, addr: u32, len: usize) {
        self.mark(addr, len, Ecc::Invalid);
    }

    /// Raw contents, without any fault checking.
    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let start = addr as usize;
        self.mem.borrow()[start..start + len].to_vec()
    }

    pub fn ecc(&self, addr: u32) -> Ecc {
        self.ecc.borrow()[addr as usize / GRANULE]
    }

    /// Does every granule touching the range hold valid ECC.
    pub fn ecc_valid(&self, addr: u32, len: usize) -> bool {
        self.granules(addr, len)
            .all(|g| self.ecc.borrow()[g] == Ecc::Valid)
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection.get()
    }

    /// Is a fault address waiting to be drained.
    pub fn fault_pending(&self) -> bool {
        self.fault_addr.get().is_some()
    }

    /// Bytes read through [`ProgramMemory`] so far.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read.get()
    }

    /// Data aborts delivered so far.
    pub fn aborts(&self) -> usize {
        self.aborts.get()
    }

    fn granules(&self, addr: u32, len: usize) -> std::ops::Range<usize> {
        let first = addr as usize / GRANULE;
        let last = (addr as usize + len).div_ceil(GRANULE);
        first..last
    }

    fn mark(&self, addr: u32, len: usize, state: Ecc) {
        let range = self.granules(addr, len);
        self.ecc.borrow_mut()[range].fill(state);
    }

    fn erase(&self, base: u32, size: u32) {
        let start = base as usize;
        self.mem.borrow_mut()[start..start + size as usize].fill(0xff);
        self.mark(base, size as usize, Ecc::Invalid);
    }

    /// Program one granule.  Flash can only clear bits.
    fn program(&self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        let mut mem = self.mem.borrow_mut();
        for (cell, byte) in mem[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        drop(mem);
        self.mark(addr, data.len(), Ecc::Valid);
    }

    fn abort(&self, addr: u32) {
        if self.fault_addr.get().is_some() {
            // Capture is frozen; the fault goes unreported.
            return;
        }
        self.fault_addr.set(Some(addr));
        self.aborts.set(self.aborts.get() + 1);
        let resumed = match self.sink.get() {
            Some(sink) => sink.data_abort(addr),
            None => false,
        };
        if !resumed {
            panic!("unrecoverable data abort at {:#x}", addr);
        }
    }
}

impl Default for SimBank<'_> {
    fn default() -> Self {
        SimBank::new()
    }
}

impl FaultCapture for SimBank<'_> {
    fn drain_fault_address(&self) -> u32 {
        self.fault_addr.take().unwrap_or(0)
    }
}

impl ProgramMemory for SimBank<'_> {
    fn read(&self, addr: u32, bytes: &mut [u8]) {
        let start = addr as usize;
        bytes.copy_from_slice(&self.mem.borrow()[start..start + bytes.len()]);
        self.bytes_read.set(self.bytes_read.get() + bytes.len());

        if self.detection.get() {
            let bad = self
                .granules(addr, bytes.len())
                .find(|&g| self.ecc.borrow()[g] == Ecc::Invalid);
            if let Some(g) = bad {
                self.abort((g * GRANULE) as u32);
            }
        }
    }
}

/// Commands seen by the controller.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Stats {
    /// Every call through the controller interface.
    pub accesses: usize,
    pub erases: usize,
    pub programs: usize,
    pub blank_checks: usize,
    pub polls: usize,
    pub flushes: usize,
    pub suspends: usize,
    pub clear_mores: usize,
}

/// Failures to inject.
#[derive(Debug, Default, Copy, Clone)]
pub struct Faults {
    pub reject_init: bool,
    /// Bring-up never finishes.
    pub hang_init: bool,
    /// Erase of any sector never finishes.
    pub hang_erase: bool,
    /// Erase completes but leaves the sector unerased.
    pub incomplete_erase: bool,
    /// Programming this address never finishes.
    pub hang_program_at: Option<u32>,
    /// Programming this address stores a flipped bit.
    pub weak_cell_at: Option<u32>,
}

/// The flash controller's state machine.
pub struct SimController<'b, 'a> {
    bank: &'b SimBank<'a>,
    timing: Timing,
    pub faults: Faults,
    stats: Stats,
    enabled: SectorMask,
    status: FsmStatus,
    busy_left: u32,
    hung: bool,
}

impl<'b, 'a> SimController<'b, 'a> {
    pub fn new(bank: &'b SimBank<'a>, timing: Timing) -> Self {
        SimController {
            bank,
            timing,
            faults: Faults::default(),
            stats: Stats::default(),
            enabled: SectorMask::default(),
            status: FsmStatus::empty(),
            busy_left: 0,
            hung: false,
        }
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn enabled_sectors(&self) -> SectorMask {
        self.enabled
    }

    fn start(&mut self, polls: u32, hang: bool) {
        self.status = FsmStatus::empty();
        self.busy_left = polls;
        self.hung = hang;
    }

    fn touch(&mut self) {
        self.stats.accesses += 1;
    }
}

impl FaultCapture for SimController<'_, '_> {
    fn drain_fault_address(&self) -> u32 {
        self.bank.drain_fault_address()
    }
}

impl FlashController for SimController<'_, '_> {
    fn set_ecc_detection(&mut self, enabled: bool) {
        self.touch();
        self.bank.detection.set(enabled);
    }

    fn init_bank(&mut self) -> Result<()> {
        self.touch();
        if self.faults.reject_init {
            return Err(Error::Rejected);
        }
        Ok(())
    }

    fn enable_sectors(&mut self, mask: SectorMask) -> Result<()> {
        self.touch();
        self.enabled = mask;
        self.start(self.timing.init_polls, self.faults.hang_init);
        Ok(())
    }

    fn poll_status(&mut self) -> FsmStatus {
        self.touch();
        self.stats.polls += 1;
        if self.hung {
            return self.status | FsmStatus::BUSY;
        }
        if self.busy_left > 0 {
            self.busy_left -= 1;
            return self.status | FsmStatus::BUSY;
        }
        self.status
    }

    fn issue_erase(&mut self, sector_base: u32) -> Result<()> {
        self.touch();
        self.stats.erases += 1;
        let sector = match sector_at(sector_base) {
            Some(s) if s.base == sector_base => *s,
            _ => return Err(Error::NotAligned),
        };
        self.start(self.timing.erase_polls, self.faults.hang_erase);
        if !self.enabled.contains(sector.index) {
            self.status = FsmStatus::SECTOR_LOCKED | FsmStatus::COMMAND_FAILED;
            return Ok(());
        }
        if !self.faults.incomplete_erase {
            self.bank.erase(sector.base, sector.size);
        }
        Ok(())
    }

    fn issue_program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.touch();
        self.stats.programs += 1;
        if data.len() != GRANULE || addr as usize % GRANULE != 0 {
            return Err(Error::NotAligned);
        }
        let sector = sector_at(addr).ok_or(Error::OutOfBounds)?;
        self.start(self.timing.program_polls, self.faults.hang_program_at == Some(addr));
        if !self.enabled.contains(sector.index) {
            self.status = FsmStatus::SECTOR_LOCKED | FsmStatus::COMMAND_FAILED;
            return Ok(());
        }
        if self.faults.weak_cell_at == Some(addr) {
            let mut weak = [0u8; GRANULE];
            weak.copy_from_slice(data);
            weak[0] ^= 0x01;
            self.bank.program(addr, &weak);
        } else {
            self.bank.program(addr, data);
        }
        Ok(())
    }

    fn issue_blank_check(&mut self, addr: u32, len: u32) -> Result<()> {
        self.touch();
        self.stats.blank_checks += 1;
        let start = addr as usize;
        let blank = self.bank.mem.borrow()[start..start + len as usize]
            .iter()
            .all(|&b| b == 0xff);
        if blank {
            Ok(())
        } else {
            Err(Error::NotErased)
        }
    }

    fn read(&mut self, addr: u32, bytes: &mut [u8]) {
        self.touch();
        self.bank.read(addr, bytes);
    }

    fn flush_pipeline(&mut self) {
        self.touch();
        self.stats.flushes += 1;
    }

    fn suspend_fsm(&mut self) {
        self.touch();
        self.stats.suspends += 1;
        self.hung = false;
        self.busy_left = 0;
    }

    fn clear_more(&mut self) {
        self.touch();
        self.stats.clear_mores += 1;
        self.status = FsmStatus::empty();
    }
}
