//! Boot slot selection
//!
//! The selector runs straight out of reset, with interrupts disabled and
//! nobody to report to.  It probes each candidate slot in turn:
//!
//! ```text
//!   PROBE(1) ──valid──▶ VALID(1) ──▶ hand off, never returns
//!      │
//!   invalid
//!      ▼
//!   INVALID(1) ──pulse──▶ PROBE(2) ─▶ ... ─▶ INVALID(n) ──pulse──▶ PROBE(1)
//! ```
//!
//! There is no terminal failure state.  If every slot is bad, the selector
//! keeps cycling, blinking the indicator between probes.
//!
//! Each probe runs with the [`FaultLatch`] non-fatal, since the slot may be
//! blank or damaged and reading it can raise ECC aborts.  The latch is checked
//! at two points: after the header magic is read, and after the entrypoint has
//! been checked.  A fault anywhere in between is caught by the second check,
//! or by a CRC or entrypoint mismatch first.

use embedded_hal::{delay::DelayNs, digital::OutputPin};
use slot_layout::{
    image::{crc_digest, ENTRYPOINT_OFFSET, HEADER_MAGIC, INFO_OFFSET},
    Entrypoint, ImageHeader, InfoBlock, SlotRegion,
};
use storage::ProgramMemory;
use zerocopy::IntoBytes;

use crate::{
    fault::FaultLatch,
    log::{debug, info},
};

/// Why a slot was passed over.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// A data abort was latched while reading the slot.
    Fault,
    BadMagic,
    /// The header claims a CRC span running past the end of the slot.
    BadSize,
    BadCrc,
    /// Entrypoint magic wrong, or linked for a different slot.
    BadEntrypoint,
    /// No such slot in the table.
    NoSlot,
}

/// Where to go once a slot has been accepted.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootTarget {
    pub slot: usize,
    /// Address of the first instruction.
    pub entry: u32,
    pub burn_number: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootState {
    Probe(usize),
    Valid(BootTarget),
    Invalid(usize, Rejection),
}

/// Something visible to show the selector is still cycling.
pub trait Indicator {
    fn pulse(&mut self);
}

/// Transfer of control into the chosen image.
pub trait Handoff {
    fn jump(self, target: BootTarget) -> !;
}

/// Indicator built on an LED pin and a delay.
pub struct Blinker<P, D> {
    pin: P,
    delay: D,
    on_us: u32,
    off_us: u32,
}

impl<P: OutputPin, D: DelayNs> Blinker<P, D> {
    pub fn new(pin: P, delay: D, on_us: u32, off_us: u32) -> Self {
        Blinker { pin, delay, on_us, off_us }
    }
}

impl<P: OutputPin, D: DelayNs> Indicator for Blinker<P, D> {
    fn pulse(&mut self) {
        // Nobody to report a stuck pin to.
        let _ = self.pin.set_high();
        self.delay.delay_us(self.on_us);
        let _ = self.pin.set_low();
        self.delay.delay_us(self.off_us);
    }
}

/// The boot state machine over a slot table.  Entry 0 of the table is the
/// selector's own slot and is never probed.  The table needs at least one
/// candidate.
pub struct Selector<'a, M, I> {
    memory: &'a M,
    latch: &'a FaultLatch,
    table: &'a [SlotRegion],
    indicator: I,
    state: BootState,
}

impl<'a, M: ProgramMemory, I: Indicator> Selector<'a, M, I> {
    pub fn new(
        memory: &'a M,
        latch: &'a FaultLatch,
        table: &'a [SlotRegion],
        indicator: I,
    ) -> Self {
        Selector {
            memory,
            latch,
            table,
            indicator,
            state: BootState::Probe(1),
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Make one transition.  Once `Valid`, the state no longer changes and
    /// the latch has been returned to fatal.
    pub fn step(&mut self) -> BootState {
        self.state = match self.state {
            BootState::Probe(slot) => match probe(self.memory, self.latch, self.table, slot) {
                Ok(target) => {
                    self.latch.set_fatal();
                    info!("booting slot {} at {:#x}", slot, target.entry);
                    BootState::Valid(target)
                }
                Err(why) => {
                    debug!("slot {} invalid: {:?}", slot, why);
                    BootState::Invalid(slot, why)
                }
            },
            BootState::Invalid(slot, _) => {
                self.indicator.pulse();
                BootState::Probe(self.next_slot(slot))
            }
            valid @ BootState::Valid(_) => valid,
        };
        self.state
    }

    /// The slot after `slot`, wrapping past the end of the table back to 1.
    pub fn next_slot(&self, slot: usize) -> usize {
        if slot + 1 >= self.table.len() {
            1
        } else {
            slot + 1
        }
    }

    /// Cycle until a slot validates, then hand off to it.
    pub fn run<H: Handoff>(mut self, handoff: H) -> ! {
        loop {
            if let BootState::Valid(target) = self.step() {
                handoff.jump(target);
            }
        }
    }
}

/// Validate one slot.  Leaves the latch non-fatal; the caller decides what
/// fault policy comes next.
///
/// A fault is only drained at the two latch checks.  When a faulting read
/// also returned bad data, `BadCrc` or `BadEntrypoint` can come back first,
/// with the latch still raised and the fault address still captured.  The
/// next probe starts by clearing both.
pub fn probe<M: ProgramMemory + ?Sized>(
    memory: &M,
    latch: &FaultLatch,
    table: &[SlotRegion],
    slot: usize,
) -> Result<BootTarget, Rejection> {
    let region = match table.get(slot) {
        Some(region) => *region,
        None => return Err(Rejection::NoSlot),
    };

    latch.set_nonfatal(memory);

    let magic = memory.read_u32(region.base + ImageHeader::MAGIC_OFFSET);
    if latch.get() {
        latch.clear(memory);
        return Err(Rejection::Fault);
    }
    if magic != HEADER_MAGIC {
        return Err(Rejection::BadMagic);
    }

    let mut header = ImageHeader::default();
    memory.read(region.base, header.as_mut_bytes());
    if !header.span_fits(region.size) {
        return Err(Rejection::BadSize);
    }

    if span_crc(memory, region.base + ENTRYPOINT_OFFSET, header.size) != header.crc32 {
        return Err(Rejection::BadCrc);
    }

    let mut entry = Entrypoint::default();
    memory.read(region.base + ENTRYPOINT_OFFSET, entry.as_mut_bytes());
    if !entry.matches(region.base) {
        return Err(Rejection::BadEntrypoint);
    }

    if latch.get() {
        latch.clear(memory);
        return Err(Rejection::Fault);
    }

    Ok(BootTarget {
        slot,
        entry: entry.jump_instr,
        burn_number: header.burn_number,
    })
}

/// CRC of `len` bytes of program memory starting at `addr`.
fn span_crc<M: ProgramMemory + ?Sized>(memory: &M, addr: u32, len: u32) -> u32 {
    let mut digest = crc_digest();
    let mut buffer = [0u8; 256];
    let mut pos = 0;
    while pos < len {
        let todo = ((len - pos) as usize).min(buffer.len());
        let buf = &mut buffer[..todo];
        memory.read(addr + pos, buf);
        digest.update(buf);
        pos += todo as u32;
    }
    digest.finalize()
}

/// What a slot holds, for reporting after boot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotReport {
    pub slot: usize,
    pub verdict: Result<BootTarget, Rejection>,
    /// Present only when the info block's magic checks out and it could be
    /// read without a fault.
    pub info: Option<InfoBlock>,
}

/// Probe a slot without booting it.  The latch is fatal again on return.
pub fn inspect<M: ProgramMemory + ?Sized>(
    memory: &M,
    latch: &FaultLatch,
    table: &[SlotRegion],
    slot: usize,
) -> SlotReport {
    let verdict = probe(memory, latch, table, slot);

    let info = match table.get(slot) {
        Some(region) => {
            latch.set_nonfatal(memory);
            let mut info = InfoBlock::default();
            memory.read(region.base + INFO_OFFSET, info.as_mut_bytes());
            if latch.get() {
                latch.clear(memory);
                None
            } else if info.magic_ok() {
                Some(info)
            } else {
                None
            }
        }
        None => None,
    };

    latch.set_fatal();
    SlotReport { slot, verdict, info }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};
    use core::ops::Range;

    use slot_layout::image::{image_crc, ENTRYPOINT_MAGIC};
    use storage::{AbortSink, FaultCapture};

    use super::*;

    /// Flat memory from address 0, with ranges that abort when read.
    struct Fake<'a> {
        bytes: Vec<u8>,
        poisoned: Vec<Range<u32>>,
        latch: &'a FaultLatch,
        bytes_read: Cell<usize>,
    }

    impl<'a> Fake<'a> {
        fn new(size: usize, latch: &'a FaultLatch) -> Self {
            Fake {
                bytes: vec![0xff; size],
                poisoned: Vec::new(),
                latch,
                bytes_read: Cell::new(0),
            }
        }

        fn place(&mut self, base: u32, data: &[u8]) {
            let base = base as usize;
            self.bytes[base..base + data.len()].copy_from_slice(data);
        }
    }

    impl FaultCapture for Fake<'_> {
        fn drain_fault_address(&self) -> u32 {
            0
        }
    }

    impl ProgramMemory for Fake<'_> {
        fn read(&self, addr: u32, bytes: &mut [u8]) {
            let start = addr as usize;
            bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
            self.bytes_read.set(self.bytes_read.get() + bytes.len());
            let end = addr + bytes.len() as u32;
            if self.poisoned.iter().any(|r| r.start < end && addr < r.end) {
                assert!(self.latch.data_abort(addr), "fatal data abort at {:#x}", addr);
            }
        }
    }

    #[derive(Default)]
    struct Count(usize);

    impl Indicator for &mut Count {
        fn pulse(&mut self) {
            self.0 += 1;
        }
    }

    const TABLE: [SlotRegion; 3] = [
        SlotRegion::new(0x000, 0x100),
        SlotRegion::new(0x100, 0x100),
        SlotRegion::new(0x200, 0x100),
    ];

    fn image(base: u32, payload: usize) -> Vec<u8> {
        let entry = Entrypoint {
            magic: ENTRYPOINT_MAGIC,
            flash_addr: base,
            jump_instr: base + 32,
            reserved: 0,
        };
        let mut span = entry.as_bytes().to_vec();
        span.extend((0..payload).map(|i| i as u8));
        let header = ImageHeader {
            burn_number: 3,
            magic: HEADER_MAGIC,
            size: span.len() as u32,
            crc32: image_crc(&span),
        };
        let mut out = header.as_bytes().to_vec();
        out.extend(span);
        out
    }

    #[test]
    fn wraps_after_last_slot() {
        let latch = FaultLatch::new();
        let mem = Fake::new(0x300, &latch);
        let mut pulses = Count::default();
        let mut sel = Selector::new(&mem, &latch, &TABLE, &mut pulses);

        let seen: Vec<BootState> = (0..5).map(|_| sel.step()).collect();
        assert_eq!(
            seen,
            [
                BootState::Invalid(1, Rejection::BadMagic),
                BootState::Probe(2),
                BootState::Invalid(2, Rejection::BadMagic),
                BootState::Probe(1),
                BootState::Invalid(1, Rejection::BadMagic),
            ]
        );
        drop(sel);
        assert_eq!(pulses.0, 2);
    }

    #[test]
    fn bad_magic_skips_crc() {
        let latch = FaultLatch::new();
        let mem = Fake::new(0x300, &latch);
        assert_eq!(probe(&mem, &latch, &TABLE, 1), Err(Rejection::BadMagic));
        assert_eq!(mem.bytes_read.get(), 4);
    }

    #[test]
    fn valid_slot_boots() {
        let latch = FaultLatch::new();
        let mut mem = Fake::new(0x300, &latch);
        mem.place(0x200, &image(0x200, 100));
        let mut pulses = Count::default();
        let mut sel = Selector::new(&mem, &latch, &TABLE, &mut pulses);

        sel.step();
        sel.step();
        let state = sel.step();
        assert_eq!(
            state,
            BootState::Valid(BootTarget {
                slot: 2,
                entry: 0x220,
                burn_number: 3,
            })
        );
        assert!(latch.is_fatal());
        // Valid is terminal.
        assert_eq!(sel.step(), state);
    }

    #[test]
    fn fault_in_payload_rejects() {
        let latch = FaultLatch::new();
        let mut mem = Fake::new(0x300, &latch);
        mem.place(0x100, &image(0x100, 100));
        mem.poisoned.push(0x150..0x160);
        // Data still matches; only the latch gives it away.
        assert_eq!(probe(&mem, &latch, &TABLE, 1), Err(Rejection::Fault));
        assert!(!latch.get());
    }

    #[test]
    fn fault_on_magic_rejects() {
        let latch = FaultLatch::new();
        let mut mem = Fake::new(0x300, &latch);
        mem.poisoned.push(0x100..0x200);
        assert_eq!(probe(&mem, &latch, &TABLE, 1), Err(Rejection::Fault));
        assert!(!latch.get());
        assert_eq!(mem.bytes_read.get(), 4);
    }

    #[test]
    fn misplaced_image_rejected() {
        let latch = FaultLatch::new();
        let mut mem = Fake::new(0x300, &latch);
        // Linked for slot 2, stored in slot 1.
        mem.place(0x100, &image(0x200, 100));
        assert_eq!(probe(&mem, &latch, &TABLE, 1), Err(Rejection::BadEntrypoint));
    }

    #[test]
    fn oversized_span_rejected() {
        let latch = FaultLatch::new();
        let mut mem = Fake::new(0x300, &latch);
        mem.place(0x100, &image(0x100, 0x100 - 32 + 1));
        assert_eq!(probe(&mem, &latch, &TABLE, 1), Err(Rejection::BadSize));
    }

    #[test]
    fn missing_slot() {
        let latch = FaultLatch::new();
        let mem = Fake::new(0x300, &latch);
        assert_eq!(probe(&mem, &latch, &TABLE, 3), Err(Rejection::NoSlot));
    }

    #[test]
    fn inspect_reads_info() {
        let latch = FaultLatch::new();
        let mut mem = Fake::new(0x300, &latch);
        let mut img = image(0x100, 100);
        let info = InfoBlock {
            magic: slot_layout::image::INFO_MAGIC,
            version: [1, 2, 3, 4],
            githash: 0xabcd_ef01,
            platform: 2,
            target: 1,
            flags: 0,
            reserved: [0; 16],
        };
        // The info block sits inside the CRC span, so rebuild around it.
        img[32..64].copy_from_slice(info.as_bytes());
        let crc = image_crc(&img[16..]);
        img[12..16].copy_from_slice(&crc.to_ne_bytes());
        mem.place(0x100, &img);

        let report = inspect(&mem, &latch, &TABLE, 1);
        assert!(report.verdict.is_ok());
        assert_eq!(report.info, Some(info));
        assert!(latch.is_fatal());

        let blank = inspect(&mem, &latch, &TABLE, 2);
        assert_eq!(blank.verdict, Err(Rejection::BadMagic));
        assert_eq!(blank.info, None);
    }

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    enum Event {
        High,
        Low,
        Wait(u32),
    }

    struct Pin<'a>(&'a RefCell<Vec<Event>>);

    impl embedded_hal::digital::ErrorType for Pin<'_> {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for Pin<'_> {
        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().push(Event::High);
            Ok(())
        }

        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().push(Event::Low);
            Ok(())
        }
    }

    struct Sleep<'a>(&'a RefCell<Vec<Event>>);

    impl DelayNs for Sleep<'_> {
        fn delay_ns(&mut self, ns: u32) {
            self.0.borrow_mut().push(Event::Wait(ns / 1000));
        }

        fn delay_us(&mut self, us: u32) {
            self.0.borrow_mut().push(Event::Wait(us));
        }
    }

    #[test]
    fn blinker_pulses_once_per_call() {
        let events = RefCell::new(Vec::new());
        let mut blinker = Blinker::new(Pin(&events), Sleep(&events), 100, 400);
        blinker.pulse();
        blinker.pulse();
        let pulse = [Event::High, Event::Wait(100), Event::Low, Event::Wait(400)];
        assert_eq!(*events.borrow(), [pulse, pulse].concat());
    }
}
