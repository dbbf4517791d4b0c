//! Data abort path.
//!
//! The vector jumps to `data_abort_handler`, which hands the faulting address
//! to the global fault latch.  If the latch is non-fatal the handler returns
//! to the instruction after the faulting load, leaving whatever the load
//! produced in its destination register.  Otherwise the core stops here.
//!
//! Resuming assumes the faulting load was an ARM (32-bit) instruction.

use slotboot::FaultLatch;
use storage::AbortSink;

#[cfg(all(target_arch = "arm", target_os = "none"))]
core::arch::global_asm!(
    ".section .text.data_abort_handler, \"ax\"",
    ".global data_abort_handler",
    ".arm",
    "data_abort_handler:",
    "    push {{r0-r3, r12, lr}}",
    // Data fault address register.
    "    mrc p15, 0, r0, c6, c0, 0",
    "    bl data_abort_entry",
    "    cmp r0, #0",
    "    pop {{r0-r3, r12, lr}}",
    "    beq 1f",
    "    subs pc, lr, #4",
    "1:  b 1b",
);

#[no_mangle]
extern "C" fn data_abort_entry(addr: u32) -> bool {
    FaultLatch::global().data_abort(addr)
}
