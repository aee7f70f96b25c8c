//! Data watchpoints over the hardware debug registers.
//!
//! A watchpoint observes 1, 2, 4 or 8 bytes at an address aligned to that
//! size and stops the inferior on write or read/write access. The engine
//! re-reads the watched bytes on enable and on every fire so front ends can
//! show the old and new values.

use crate::addr::VirtAddr;
use crate::errors::{DebuggerError, Result};
use crate::process::{clear_hardware_stoppoint, set_hardware_stoppoint};
use crate::registers::Registers;
use crate::stoppoint::{Stoppoint, StoppointMode};

/// One hardware data watchpoint.
pub struct WatchpointSite {
    id: i32,
    address: VirtAddr,
    mode: StoppointMode,
    size: usize,
    is_enabled: bool,
    hardware_register_index: i32,
    data: u64,
    previous_data: u64,
}

impl WatchpointSite {
    pub(crate) fn new(
        id: i32,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<Self> {
        if !matches!(size, 1 | 2 | 4 | 8) || (address.u64() & (size as u64 - 1)) != 0 {
            return Err(DebuggerError::Alignment {
                addr: address.u64(),
                size,
            });
        }
        Ok(WatchpointSite {
            id,
            address,
            mode,
            size,
            is_enabled: false,
            hardware_register_index: -1,
            data: 0,
            previous_data: 0,
        })
    }

    pub fn mode(&self) -> StoppointMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The watched value as of the most recent enable or fire.
    pub fn data(&self) -> u64 {
        self.data
    }

    /// The watched value before the most recent update.
    pub fn previous_data(&self) -> u64 {
        self.previous_data
    }

    pub(crate) fn enable(&mut self, regs: &mut Registers) -> Result<()> {
        if self.is_enabled {
            return Ok(());
        }
        self.hardware_register_index =
            set_hardware_stoppoint(regs, self.address, self.mode, self.size)?;
        self.is_enabled = true;
        Ok(())
    }

    pub(crate) fn disable(&mut self, regs: &mut Registers) -> Result<()> {
        if !self.is_enabled {
            return Ok(());
        }
        clear_hardware_stoppoint(regs, self.hardware_register_index)?;
        self.hardware_register_index = -1;
        self.is_enabled = false;
        Ok(())
    }

    /// Rotates in a freshly read copy of the watched bytes.
    pub(crate) fn update_data(&mut self, memory: &[u8]) {
        let mut word = [0u8; 8];
        let n = memory.len().min(8);
        word[..n].copy_from_slice(&memory[..n]);
        self.previous_data = self.data;
        self.data = u64::from_le_bytes(word);
    }
}

impl Stoppoint for WatchpointSite {
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
