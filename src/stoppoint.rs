//! Generic stoppoint bookkeeping.
//!
//! Breakpoint sites and watchpoints share the same shape: an id, an
//! address, and an enabled flag. The [`Stoppoint`] trait captures that
//! capability set and [`StoppointCollection`] stores either kind indexed by
//! id and by address.
//!
//! Enabling and disabling need kernel access, so those operations live on
//! the site types themselves and take the process's resources by parameter;
//! the owning [`crate::process::Process`] guarantees that a site is
//! disabled before it is removed from its collection.

use crate::addr::VirtAddr;

/// What kind of access makes a hardware stoppoint fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppointMode {
    Write,
    ReadWrite,
    Execute,
}

/// The capability set every stoppoint kind implements.
pub trait Stoppoint {
    fn id(&self) -> i32;
    fn address(&self) -> VirtAddr;
    fn is_enabled(&self) -> bool;

    fn at_address(&self, addr: VirtAddr) -> bool {
        self.address() == addr
    }

    fn in_range(&self, low: VirtAddr, high: VirtAddr) -> bool {
        low <= self.address() && self.address() < high
    }
}

/// Ordered container of stoppoints, keyed by id and by address.
///
/// Ids are unique and strictly increasing within a process; no two enabled
/// entries share an address.
pub struct StoppointCollection<T: Stoppoint> {
    stoppoints: Vec<T>,
}

impl<T: Stoppoint> Default for StoppointCollection<T> {
    fn default() -> Self {
        StoppointCollection {
            stoppoints: Vec::new(),
        }
    }
}

impl<T: Stoppoint> StoppointCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stoppoint: T) -> &mut T {
        self.stoppoints.push(stoppoint);
        self.stoppoints.last_mut().unwrap()
    }

    pub fn contains_id(&self, id: i32) -> bool {
        self.get_by_id(id).is_some()
    }

    pub fn contains_address(&self, address: VirtAddr) -> bool {
        self.get_by_address(address).is_some()
    }

    pub fn enabled_stoppoint_at_address(&self, address: VirtAddr) -> bool {
        self.get_by_address(address)
            .is_some_and(|point| point.is_enabled())
    }

    pub fn get_by_id(&self, id: i32) -> Option<&T> {
        self.stoppoints.iter().find(|point| point.id() == id)
    }

    pub fn get_by_id_mut(&mut self, id: i32) -> Option<&mut T> {
        self.stoppoints.iter_mut().find(|point| point.id() == id)
    }

    pub fn get_by_address(&self, address: VirtAddr) -> Option<&T> {
        self.stoppoints.iter().find(|point| point.at_address(address))
    }

    pub fn get_by_address_mut(&mut self, address: VirtAddr) -> Option<&mut T> {
        self.stoppoints
            .iter_mut()
            .find(|point| point.at_address(address))
    }

    /// Removes and returns the stoppoint with the given id.
    ///
    /// The caller must have disabled it first so no trap byte or debug
    /// register reservation outlives the removal.
    pub fn remove_by_id(&mut self, id: i32) -> Option<T> {
        let index = self.stoppoints.iter().position(|point| point.id() == id)?;
        Some(self.stoppoints.remove(index))
    }

    /// Removes and returns the stoppoint at the given address.
    pub fn remove_by_address(&mut self, address: VirtAddr) -> Option<T> {
        let index = self
            .stoppoints
            .iter()
            .position(|point| point.at_address(address))?;
        Some(self.stoppoints.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.stoppoints.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.stoppoints.iter_mut()
    }

    /// All stoppoints whose address lies in `[low, high)`.
    pub fn get_in_region(&self, low: VirtAddr, high: VirtAddr) -> Vec<&T> {
        self.stoppoints
            .iter()
            .filter(|point| point.in_range(low, high))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stoppoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stoppoints.is_empty()
    }
}
