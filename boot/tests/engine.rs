// Flash programming engine against the simulated controller.

use simflash::{styles, Faults, SimBank, SimController};
use slot_layout::SLOT_TABLE;
use slotboot::{EngineConfig, Error, FaultLatch};
use storage::GRANULE;

mod common;

use common::{engine, engine_with};

fn tight() -> EngineConfig {
    EngineConfig {
        poll_budget: 100,
        ..EngineConfig::default()
    }
}

#[test]
fn erase_then_program() {
    for timing in styles::ALL_TIMINGS {
        let latch = FaultLatch::new();
        let bank = SimBank::new();
        bank.connect(&latch);
        bank.install(0x8000, &[0x33; 0x100]);

        let mut eng = engine(&bank, &latch, *timing);
        eng.init(1).unwrap();
        assert!(!bank.detection_enabled());
        let state = eng.state().unwrap();
        assert_eq!(state.active_slot.number(), 1);
        assert!(state.ecc_disabled);

        eng.erase_slot(1).unwrap();
        assert_eq!(bank.peek(0x8000, 0x100), vec![0xff; 0x100]);

        let data: Vec<u8> = (0..0x200).map(|i| (i * 3) as u8).collect();
        let mut addr = 0x8000;
        eng.write(&mut addr, &data[..0x100]).unwrap();
        eng.write(&mut addr, &data[0x100..]).unwrap();
        assert_eq!(addr, 0x8200);
        assert_eq!(bank.peek(0x8000, 0x200), data);
        assert!(bank.ecc_valid(0x8000, 0x200));

        eng.deinit();
        assert_eq!(eng.state(), None);
        assert!(bank.detection_enabled());
        assert!(latch.is_fatal());

        let stats = eng.controller().stats();
        assert_eq!(stats.erases, 1);
        assert_eq!(stats.blank_checks, 1);
        assert_eq!(stats.programs, 0x200 / GRANULE);
    }
}

#[test]
fn two_sector_slot() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let mut eng = engine(&bank, &latch, styles::RM46);
    eng.init(3).unwrap();
    eng.erase_slot(3).unwrap();
    assert_eq!(eng.controller().stats().erases, 2);
    assert_eq!(eng.controller().enabled_sectors().0, 0b1_1000);

    // Writes may cross the sector boundary inside the slot.
    let mut addr = 0x20000 - 0x20;
    eng.write(&mut addr, &[0xa5; 0x40]).unwrap();
    assert_eq!(bank.peek(0x1ffe0, 0x40), vec![0xa5; 0x40]);
    eng.deinit();
}

#[test]
fn unaligned_length_touches_nothing() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let mut eng = engine(&bank, &latch, styles::INSTANT);

    let mut addr = 0x8000;
    assert_eq!(eng.write(&mut addr, &[0; 15]), Err(Error::Unaligned(15)));
    assert_eq!(eng.controller().stats().accesses, 0);

    eng.init(1).unwrap();
    let before = eng.controller().stats();
    assert_eq!(eng.write(&mut addr, &[0; 17]), Err(Error::Unaligned(17)));
    let mut odd = 0x8008;
    assert_eq!(eng.write(&mut odd, &[0; 16]), Err(Error::Unaligned(0x8008)));
    let mut outside = 0x10000;
    assert_eq!(eng.write(&mut outside, &[0; 16]), Err(Error::OutOfRange(0x10000)));
    let mut straddle = 0x10000 - 16;
    assert_eq!(eng.write(&mut straddle, &[0; 32]), Err(Error::OutOfRange(0xfff0)));
    assert_eq!(eng.controller().stats(), before);
    assert_eq!(addr, 0x8000);
    eng.deinit();
}

#[test]
fn session_rules() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let mut eng = engine(&bank, &latch, styles::INSTANT);

    assert_eq!(eng.erase_slot(1), Err(Error::NotActive));
    let mut addr = 0x8000;
    assert_eq!(eng.write(&mut addr, &[0; 16]), Err(Error::NotActive));
    assert_eq!(eng.init(0), Err(Error::InvalidSlot(0)));
    assert_eq!(eng.init(SLOT_TABLE.len() as u8), Err(Error::InvalidSlot(6)));
    assert_eq!(eng.controller().stats().accesses, 0);

    eng.init(2).unwrap();
    assert_eq!(eng.init(2), Err(Error::AlreadyActive));
    assert_eq!(eng.erase_slot(1), Err(Error::WrongSlot(1)));
    assert_eq!(eng.controller().stats().erases, 0);

    eng.deinit();
    // Closing twice is harmless.
    eng.deinit();
    assert_eq!(eng.state(), None);
    assert!(latch.is_fatal());
}

#[test]
fn init_refused() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let ctrl = SimController::new(&bank, styles::INSTANT).with_faults(Faults {
        reject_init: true,
        ..Default::default()
    });
    let mut eng = engine_with(ctrl, &latch, tight());
    assert_eq!(eng.init(1), Err(Error::Init));
    assert_eq!(eng.state(), None);
    assert!(bank.detection_enabled());
}

#[test]
fn init_hangs() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let ctrl = SimController::new(&bank, styles::INSTANT).with_faults(Faults {
        hang_init: true,
        ..Default::default()
    });
    let mut eng = engine_with(ctrl, &latch, tight());
    assert_eq!(eng.init(4), Err(Error::InitTimeout));
    assert_eq!(eng.state(), None);
    assert!(bank.detection_enabled());
    assert!(latch.is_fatal());
    assert_eq!(eng.controller().stats().polls, 100);
}

#[test]
fn erase_hangs() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let ctrl = SimController::new(&bank, styles::INSTANT).with_faults(Faults {
        hang_erase: true,
        ..Default::default()
    });
    let mut eng = engine_with(ctrl, &latch, tight());
    eng.init(1).unwrap();
    assert_eq!(eng.erase_slot(1), Err(Error::EraseTimeout(0x8000)));

    let stats = eng.controller().stats();
    assert_eq!(stats.suspends, 1);
    assert_eq!(stats.clear_mores, 1);
    assert!(stats.flushes >= 1);
    // The session stays open for the caller to close.
    assert!(eng.state().is_some());
    eng.deinit();
}

#[test]
fn slow_erase_exhausts_budget() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let config = EngineConfig {
        poll_budget: 1_000,
        ..EngineConfig::default()
    };
    let mut eng = engine_with(SimController::new(&bank, styles::SLUGGISH), &latch, config);
    eng.init(2).unwrap();
    assert_eq!(eng.erase_slot(2), Err(Error::EraseTimeout(0x10000)));
    eng.deinit();

    // The default budget outlasts it.
    let mut eng = engine(&bank, &latch, styles::SLUGGISH);
    eng.init(2).unwrap();
    eng.erase_slot(2).unwrap();
    eng.deinit();
}

#[test]
fn erase_leaves_data() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    bank.install(0x40000 + 0x30000, &[0; 64]);
    let ctrl = SimController::new(&bank, styles::INSTANT).with_faults(Faults {
        incomplete_erase: true,
        ..Default::default()
    });
    let mut eng = engine_with(ctrl, &latch, tight());
    eng.init(4).unwrap();
    // The first sector happens to be blank already.
    assert_eq!(eng.erase_slot(4), Err(Error::BlankCheck(0x60000)));
    // The check read the erased sector back without tripping over its ECC.
    assert!(!bank.detection_enabled());
    assert_eq!(bank.aborts(), 0);
    eng.deinit();
}

#[test]
fn program_hangs() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let ctrl = SimController::new(&bank, styles::INSTANT).with_faults(Faults {
        hang_program_at: Some(0x8020),
        ..Default::default()
    });
    let mut eng = engine_with(ctrl, &latch, tight());
    eng.init(1).unwrap();
    eng.erase_slot(1).unwrap();

    let mut addr = 0x8000;
    assert_eq!(eng.write(&mut addr, &[0x11; 64]), Err(Error::WriteTimeout(0x8020)));
    // Granules before the hang were committed.
    assert_eq!(addr, 0x8020);
    assert_eq!(eng.controller().stats().suspends, 1);
    eng.deinit();
}

#[test]
fn readback_mismatch() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let ctrl = SimController::new(&bank, styles::INSTANT).with_faults(Faults {
        weak_cell_at: Some(0x10010),
        ..Default::default()
    });
    let mut eng = engine_with(ctrl, &latch, tight());
    eng.init(2).unwrap();
    eng.erase_slot(2).unwrap();
    let mut addr = 0x10000;
    assert_eq!(eng.write(&mut addr, &[0xee; 48]), Err(Error::Verify(0x10010)));
    eng.deinit();
}

#[test]
fn deinit_drains_leftover_fault() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);

    // An earlier probe faulted and never acknowledged it.
    latch.set_nonfatal(&bank);
    let mut word = [0u8; 4];
    storage::ProgramMemory::read(&bank, 0x9000, &mut word);
    assert!(latch.get());
    assert!(bank.fault_pending());

    let mut eng = engine(&bank, &latch, styles::INSTANT);
    eng.init(1).unwrap();
    eng.deinit();
    assert!(!latch.get());
    assert!(!bank.fault_pending());
    assert!(latch.is_fatal());
}

#[test]
#[should_panic(expected = "unrecoverable data abort")]
fn fatal_after_deinit() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let mut eng = engine(&bank, &latch, styles::INSTANT);
    eng.init(1).unwrap();
    eng.deinit();
    let mut word = [0u8; 4];
    storage::ProgramMemory::read(&bank, 0x9000, &mut word);
}

#[test]
fn settles_after_each_operation() {
    let latch = FaultLatch::new();
    let bank = SimBank::new();
    bank.connect(&latch);
    let config = EngineConfig {
        settle_us: 250,
        ..EngineConfig::default()
    };
    let mut eng = engine_with(SimController::new(&bank, styles::INSTANT), &latch, config);
    eng.init(1).unwrap();
    eng.erase_slot(1).unwrap();
    let mut addr = 0x8000;
    eng.write(&mut addr, &[0; 32]).unwrap();
    let (_, delay) = eng.into_parts();
    assert_eq!(delay.total_us(), 500);
}
