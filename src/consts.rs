//! `si_code` values for SIGTRAP, straight from the kernel uapi headers.
//! They are deeply nested into the libc, and not reliably available from nix
//! or the rust bindings of the libc.
//!
//! Source: <https://elixir.bootlin.com/linux/v6.13.1/source/include/uapi/asm-generic/siginfo.h#L227>

#![allow(unused)]

/// Sent by the kernel from somewhere
pub const SI_KERNEL: i32 = 0x80;

// ---------------- SIGTRAP si_codes ----------------

/// Process breakpoint
pub const TRAP_BRKPT: i32 = 0x1;
/// Process trace trap
pub const TRAP_TRACE: i32 = 0x2;
/// Process taken branch trap
pub const TRAP_BRANCH: i32 = 0x3;
/// Hardware breakpoint/watchpoint
pub const TRAP_HWBKPT: i32 = 0x4;
/// Undiagnosed trap
pub const TRAP_UNK: i32 = 0x5;
