//! Address value types.
//!
//! Two address spaces show up everywhere in a debugger: addresses as they
//! appear inside an ELF file on disk ([`FileAddr`]) and addresses in the
//! running inferior ([`VirtAddr`]). They differ by the load bias the kernel
//! applied at exec time, and mixing them up is a classic source of
//! off-by-a-whole-mapping bugs, so both are distinct types and every
//! conversion is explicit.

use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::elf::ElfFile;

/// An address in the inferior's virtual address space.
#[derive(Default, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        VirtAddr(addr)
    }

    pub fn u64(&self) -> u64 {
        self.0
    }

    pub fn usize(&self) -> usize {
        self.0 as usize
    }

    /// Converts to a file address in `elf`, subtracting the load bias.
    ///
    /// Returns `None` when no section of `elf` covers this address.
    pub fn to_file_addr<'elf>(self, elf: &'elf ElfFile) -> Option<FileAddr<'elf>> {
        elf.section_containing_virt(self)?;
        Some(FileAddr::new(self.0 - elf.load_bias().u64(), elf))
    }
}

impl Display for VirtAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl std::fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Add<i64> for VirtAddr {
    type Output = Self;
    fn add(self, rhs: i64) -> Self::Output {
        Self(self.0.wrapping_add_signed(rhs))
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs as u64)
    }
}

impl AddAssign<usize> for VirtAddr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs as u64;
    }
}

impl Sub<i64> for VirtAddr {
    type Output = Self;
    fn sub(self, rhs: i64) -> Self::Output {
        Self(self.0.wrapping_sub(rhs as u64))
    }
}

impl Sub<usize> for VirtAddr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs as u64)
    }
}

impl SubAssign<usize> for VirtAddr {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 -= rhs as u64;
    }
}

impl Sub for VirtAddr {
    type Output = u64;
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<u64> for VirtAddr {
    fn from(value: u64) -> Self {
        VirtAddr(value)
    }
}

impl From<usize> for VirtAddr {
    fn from(value: usize) -> Self {
        VirtAddr(value as u64)
    }
}

impl From<VirtAddr> for u64 {
    fn from(value: VirtAddr) -> Self {
        value.0
    }
}

/// An address as written in an ELF file, tagged with the owning file.
///
/// Comparing or subtracting file addresses of two different ELF files is
/// meaningless; doing so is a programming error and asserts.
#[derive(Clone, Copy)]
pub struct FileAddr<'elf> {
    addr: u64,
    elf: &'elf ElfFile,
}

impl<'elf> FileAddr<'elf> {
    pub fn new(addr: u64, elf: &'elf ElfFile) -> Self {
        FileAddr { addr, elf }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn elf_file(&self) -> &'elf ElfFile {
        self.elf
    }

    fn same_owner(&self, other: &Self) -> bool {
        std::ptr::eq(self.elf, other.elf)
    }

    /// Converts to a virtual address by adding the owner's load bias.
    ///
    /// Returns `None` when no section of the owner covers this address.
    pub fn to_virt_addr(self) -> Option<VirtAddr> {
        self.elf.section_containing_file(self)?;
        Some(VirtAddr(self.elf.load_bias().u64() + self.addr))
    }
}

impl PartialEq for FileAddr<'_> {
    fn eq(&self, other: &Self) -> bool {
        assert!(
            self.same_owner(other),
            "compared file addresses of different ELF files"
        );
        self.addr == other.addr
    }
}

impl Eq for FileAddr<'_> {}

impl PartialOrd for FileAddr<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        assert!(
            self.same_owner(other),
            "compared file addresses of different ELF files"
        );
        self.addr.partial_cmp(&other.addr)
    }
}

impl Add<i64> for FileAddr<'_> {
    type Output = Self;
    fn add(self, rhs: i64) -> Self::Output {
        Self {
            addr: self.addr.wrapping_add_signed(rhs),
            elf: self.elf,
        }
    }
}

impl Add<usize> for FileAddr<'_> {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self {
            addr: self.addr + rhs as u64,
            elf: self.elf,
        }
    }
}

impl Sub<usize> for FileAddr<'_> {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self {
            addr: self.addr - rhs as u64,
            elf: self.elf,
        }
    }
}

impl Display for FileAddr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.addr)
    }
}

impl std::fmt::Debug for FileAddr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.addr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_arithmetic() {
        let a = VirtAddr::from(100u64);
        assert_eq!((a + 50usize).u64(), 150);
        assert_eq!((a - 50usize).u64(), 50);
        assert_eq!((a + (-25i64)).u64(), 75);
        assert_eq!(a + 100usize - a, 100);
    }

    #[test]
    fn test_addr_ordering() {
        assert!(VirtAddr::from(0x1000u64) < VirtAddr::from(0x2000u64));
        assert_eq!(VirtAddr::from(42u64), VirtAddr::from(42u64));
    }

    #[test]
    fn test_addr_conversions() {
        let a = VirtAddr::from(0x1234u64);
        assert_eq!(a.u64(), 0x1234u64);
        assert_eq!(format!("{a}"), "0x0000000000001234");
    }
}
