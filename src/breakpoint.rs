//! One breakpoint site: a single stop condition at a single virtual
//! address, either a software `int3` patch or a hardware debug-register
//! reservation.
//!
//! Software sites save the instruction byte they clobber so memory reads
//! and disassembly can paper over the trap opcode, and so disabling
//! restores the original code exactly.

use nix::sys::ptrace;

use crate::addr::VirtAddr;
use crate::errors::{DebuggerError, Result};
use crate::process::{clear_hardware_stoppoint, set_hardware_stoppoint};
use crate::registers::Registers;
use crate::stoppoint::{Stoppoint, StoppointMode};

/// The single-byte x86-64 trap opcode.
pub const INT3_BYTE: u8 = 0xcc;

const INT3: i64 = 0xcc;
const WORD_MASK: i64 = 0xff;

/// One software or hardware execution breakpoint.
///
/// Internal sites (set by the engine rather than the user) carry id `-1`
/// and are skipped by listing commands.
pub struct BreakpointSite {
    id: i32,
    address: VirtAddr,
    is_enabled: bool,
    saved_byte: Option<u8>,
    is_internal: bool,
    is_hardware: bool,
    hardware_register_index: i32,
}

impl BreakpointSite {
    pub(crate) fn new(id: i32, address: VirtAddr, is_internal: bool, is_hardware: bool) -> Self {
        BreakpointSite {
            id: if is_internal { -1 } else { id },
            address,
            is_enabled: false,
            saved_byte: None,
            is_internal,
            is_hardware,
            hardware_register_index: -1,
        }
    }

    pub fn is_hardware(&self) -> bool {
        self.is_hardware
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    /// The instruction byte replaced by the trap opcode, once enabled.
    pub fn saved_byte(&self) -> Option<u8> {
        self.saved_byte
    }

    /// Arms the breakpoint. Enabling an enabled site is a no-op.
    pub(crate) fn enable(&mut self, regs: &mut Registers) -> Result<()> {
        if self.is_enabled {
            return Ok(());
        }

        if self.is_hardware {
            self.hardware_register_index =
                set_hardware_stoppoint(regs, self.address, StoppointMode::Execute, 1)?;
        } else {
            let pid = regs.pid();
            let addr = self.address.u64() as ptrace::AddressType;
            let data = ptrace::read(pid, addr)
                .map_err(DebuggerError::memory("Enabling breakpoint site failed"))?;
            self.saved_byte = Some((data & WORD_MASK) as u8);

            let patched = (data & !WORD_MASK) | INT3;
            ptrace::write(pid, addr, patched)
                .map_err(DebuggerError::memory("Enabling breakpoint site failed"))?;
        }

        self.is_enabled = true;
        Ok(())
    }

    /// Disarms the breakpoint. Disabling a disabled site is a no-op.
    pub(crate) fn disable(&mut self, regs: &mut Registers) -> Result<()> {
        if !self.is_enabled {
            return Ok(());
        }

        if self.is_hardware {
            clear_hardware_stoppoint(regs, self.hardware_register_index)?;
            self.hardware_register_index = -1;
        } else {
            let pid = regs.pid();
            let addr = self.address.u64() as ptrace::AddressType;
            let data = ptrace::read(pid, addr)
                .map_err(DebuggerError::memory("Disabling breakpoint site failed"))?;
            let saved = self.saved_byte.unwrap_or(0);

            let restored = (data & !WORD_MASK) | i64::from(saved);
            ptrace::write(pid, addr, restored)
                .map_err(DebuggerError::memory("Disabling breakpoint site failed"))?;
        }

        self.is_enabled = false;
        Ok(())
    }
}

impl Stoppoint for BreakpointSite {
    fn id(&self) -> i32 {
        self.id
    }

    fn address(&self) -> VirtAddr {
        self.address
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }
}
