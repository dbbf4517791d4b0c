//! Controller styles
//!
//! Flash controllers differ mostly in how long their state machine stays busy.
//! The engine only ever sees this as a number of busy polls, so that is how
//! the simulator expresses it.

/// Busy polls reported before each kind of command completes.
#[derive(Debug, Copy, Clone)]
pub struct Timing {
    pub init_polls: u32,
    pub erase_polls: u32,
    pub program_polls: u32,
}

/// Everything completes by the first poll.
pub static INSTANT: Timing = Timing {
    init_polls: 0,
    erase_polls: 0,
    program_polls: 0,
};

/// Roughly the proportions of an RM46-class bank: erases take orders of
/// magnitude longer than programming a granule.
pub static RM46: Timing = Timing {
    init_polls: 3,
    erase_polls: 2_000,
    program_polls: 6,
};

/// Slow enough to exhaust a small poll budget on erase, without hanging.
pub static SLUGGISH: Timing = Timing {
    init_polls: 10,
    erase_polls: 50_000,
    program_polls: 100,
};

/// All of the styles that always complete.
pub static ALL_TIMINGS: [&Timing; 3] = [&INSTANT, &RM46, &SLUGGISH];
