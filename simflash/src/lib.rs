//! Simulated flash
//!
//! The boot and update logic is written against the narrow interfaces in
//! `storage`.  This crate provides host implementations of all of them, so
//! that the logic can be exercised without hardware:
//!
//! - [`SimBank`]: program memory bank 0, with per-granule ECC state.  A fresh
//!   or freshly erased granule has invalid ECC, exactly as on the device, and
//!   reading one with detection enabled raises a data abort into whatever
//!   [`storage::AbortSink`] is connected.  The fault-address register freezes
//!   on the first fault until it is drained.
//! - [`SimController`]: the flash controller state machine, with per-command
//!   busy times taken from a [`styles::Timing`] and hooks to make commands hang
//!   or program the wrong data.
//! - [`SimNor`]: the external flash part behind the bus.
//! - [`MemFs`] and [`HostFs`]: the read-only image store.
//! - [`SimDelay`]: a delay that returns at once.
//! - [`gen`]: deterministic image generation.

pub mod bank;
pub mod delay;
pub mod external;
pub mod fs;
pub mod gen;
pub mod styles;

pub use bank::{Ecc, Faults, SimBank, SimController, Stats};
pub use delay::SimDelay;
pub use external::SimNor;
pub use fs::{HostFs, MemFs};
