//! Read-only view over a memory-mapped ELF64 executable.
//!
//! The view parses just enough of the file for a debugger: the header, the
//! section header table, the symbol table (`.symtab`, falling back to
//! `.dynsym`) and the string tables needed to name things. Symbols are
//! indexed by name (mangled and demangled) and by address range so the
//! engine can answer "which symbol contains this address" without walking
//! the whole table on every stop.
//!
//! A load bias is recorded once the inferior is known to have reached its
//! entry point; from then on [`FileAddr`] ⇄ [`VirtAddr`] translation is
//! meaningful.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::addr::{FileAddr, VirtAddr};
use crate::errors::{DebuggerError, Result};

/// Symbol type: function
pub const STT_FUNC: u8 = 2;
/// Symbol type: thread-local storage
pub const STT_TLS: u8 = 6;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EI_CLASS_64: u8 = 2;
const EI_DATA_LSB: u8 = 1;
const EHDR_SIZE: usize = 64;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;

/// The fields of the ELF64 header this debugger cares about.
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_entry: u64,
    pub e_shoff: u64,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// One ELF64 section header.
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// One ELF64 symbol table entry.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Symbol {
    pub fn symbol_type(&self) -> u8 {
        self.st_info & 0xf
    }
}

/// Read-only, memory-mapped wrapper over one ELF64 file.
pub struct ElfFile {
    path: PathBuf,
    map: Mmap,
    header: ElfHeader,
    section_headers: Vec<SectionHeader>,
    section_by_name: HashMap<String, usize>,
    symbols: Vec<Symbol>,
    symbols_by_name: HashMap<String, Vec<usize>>,
    symbols_by_range: BTreeMap<(u64, u64), usize>,
    load_bias: VirtAddr,
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = data
        .get(offset..offset + 2)
        .ok_or_else(|| DebuggerError::ElfError(format!("truncated file at offset {offset}")))?;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| DebuggerError::ElfError(format!("truncated file at offset {offset}")))?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let bytes = data
        .get(offset..offset + 8)
        .ok_or_else(|| DebuggerError::ElfError(format!("truncated file at offset {offset}")))?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_cstr(data: &[u8], offset: usize) -> String {
    let Some(tail) = data.get(offset..) else {
        return String::new();
    };
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    if data.len() < EHDR_SIZE {
        return Err(DebuggerError::ElfError("file too small for an ELF header".into()));
    }
    if data[..4] != ELF_MAGIC {
        return Err(DebuggerError::ElfError("bad ELF magic".into()));
    }
    if data[4] != EI_CLASS_64 {
        return Err(DebuggerError::ElfError("not a 64-bit ELF file".into()));
    }
    if data[5] != EI_DATA_LSB {
        return Err(DebuggerError::ElfError("not a little-endian ELF file".into()));
    }

    Ok(ElfHeader {
        e_type: read_u16(data, 16)?,
        e_machine: read_u16(data, 18)?,
        e_entry: read_u64(data, 24)?,
        e_shoff: read_u64(data, 40)?,
        e_shentsize: read_u16(data, 58)?,
        e_shnum: read_u16(data, 60)?,
        e_shstrndx: read_u16(data, 62)?,
    })
}

fn parse_section_header(data: &[u8], offset: usize) -> Result<SectionHeader> {
    Ok(SectionHeader {
        sh_name: read_u32(data, offset)?,
        sh_type: read_u32(data, offset + 4)?,
        sh_flags: read_u64(data, offset + 8)?,
        sh_addr: read_u64(data, offset + 16)?,
        sh_offset: read_u64(data, offset + 24)?,
        sh_size: read_u64(data, offset + 32)?,
        sh_link: read_u32(data, offset + 40)?,
        sh_info: read_u32(data, offset + 44)?,
        sh_addralign: read_u64(data, offset + 48)?,
        sh_entsize: read_u64(data, offset + 56)?,
    })
}

fn parse_symbol(data: &[u8], offset: usize) -> Result<Symbol> {
    Ok(Symbol {
        st_name: read_u32(data, offset)?,
        st_info: *data
            .get(offset + 4)
            .ok_or_else(|| DebuggerError::ElfError("truncated symbol table".into()))?,
        st_other: *data
            .get(offset + 5)
            .ok_or_else(|| DebuggerError::ElfError("truncated symbol table".into()))?,
        st_shndx: read_u16(data, offset + 6)?,
        st_value: read_u64(data, offset + 8)?,
        st_size: read_u64(data, offset + 16)?,
    })
}

impl ElfFile {
    /// Opens and maps the ELF file at `path` and parses its metadata.
    ///
    /// Open, map, or parse failures are fatal; no partial view is exposed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = fs::File::open(&path)
            .map_err(|e| DebuggerError::ElfError(format!("cannot open {}: {e}", path.display())))?;
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| DebuggerError::ElfError(format!("cannot map {}: {e}", path.display())))?;

        let header = parse_header(&map)?;

        let mut elf = ElfFile {
            path,
            map,
            header,
            section_headers: Vec::new(),
            section_by_name: HashMap::new(),
            symbols: Vec::new(),
            symbols_by_name: HashMap::new(),
            symbols_by_range: BTreeMap::new(),
            load_bias: VirtAddr::new(0),
        };
        elf.parse_section_headers()?;
        elf.build_section_map();
        elf.parse_symbol_table()?;
        elf.build_symbol_maps();

        debug!(
            "loaded {}: {} sections, {} symbols",
            elf.path.display(),
            elf.section_headers.len(),
            elf.symbols.len()
        );
        Ok(elf)
    }

    fn parse_section_headers(&mut self) -> Result<()> {
        if self.header.e_shoff == 0 {
            return Ok(());
        }
        let shoff = self.header.e_shoff as usize;
        let entsize = self.header.e_shentsize as usize;
        if entsize < SHDR_SIZE {
            return Err(DebuggerError::ElfError(format!(
                "bad section header entry size {entsize}"
            )));
        }

        let mut num_headers = self.header.e_shnum as u64;
        // More than 0xff00 sections: the real count hides in the sh_size of
        // section header index 0.
        if num_headers == 0 && self.header.e_shentsize != 0 {
            num_headers = parse_section_header(&self.map, shoff)?.sh_size;
        }

        self.section_headers.reserve(num_headers as usize);
        for i in 0..num_headers as usize {
            self.section_headers
                .push(parse_section_header(&self.map, shoff + i * entsize)?);
        }
        Ok(())
    }

    fn build_section_map(&mut self) {
        for (index, section) in self.section_headers.iter().enumerate() {
            let name = self.section_name(section);
            self.section_by_name.insert(name, index);
        }
    }

    fn parse_symbol_table(&mut self) -> Result<()> {
        let symtab = match self.section(".symtab").or_else(|| self.section(".dynsym")) {
            Some(s) => *s,
            None => return Ok(()),
        };
        if symtab.sh_entsize as usize != SYM_SIZE {
            return Err(DebuggerError::ElfError(format!(
                "bad symbol entry size {}",
                symtab.sh_entsize
            )));
        }

        let n_entries = (symtab.sh_size / symtab.sh_entsize) as usize;
        let base = symtab.sh_offset as usize;
        self.symbols.reserve(n_entries);
        for i in 0..n_entries {
            self.symbols.push(parse_symbol(&self.map, base + i * SYM_SIZE)?);
        }
        Ok(())
    }

    fn build_symbol_maps(&mut self) {
        for (index, symbol) in self.symbols.iter().enumerate() {
            let mangled = self.string_at(symbol.st_name as usize);
            let demangled = format!("{:#}", rustc_demangle::demangle(&mangled));
            if demangled != mangled {
                self.symbols_by_name
                    .entry(demangled)
                    .or_default()
                    .push(index);
            }
            self.symbols_by_name
                .entry(mangled)
                .or_default()
                .push(index);

            // Only symbols with an address and a name are useful for
            // containment queries; TLS addresses live in another space.
            if symbol.st_value != 0 && symbol.st_name != 0 && symbol.symbol_type() != STT_TLS {
                self.symbols_by_range.insert(
                    (symbol.st_value, symbol.st_value + symbol.st_size),
                    index,
                );
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn load_bias(&self) -> VirtAddr {
        self.load_bias
    }

    /// Records the load bias once the inferior has reached its entry point.
    pub fn notify_loaded(&mut self, bias: VirtAddr) {
        self.load_bias = bias;
    }

    /// The entry point as a file address of this ELF.
    pub fn entry_point(&self) -> FileAddr<'_> {
        FileAddr::new(self.header.e_entry, self)
    }

    /// Resolves a section name from the section-name string table.
    pub fn section_name(&self, section: &SectionHeader) -> String {
        let Some(shstrtab) = self.section_headers.get(self.header.e_shstrndx as usize) else {
            return String::new();
        };
        read_cstr(
            &self.map,
            shstrtab.sh_offset as usize + section.sh_name as usize,
        )
    }

    /// Resolves a string from `.strtab`, falling back to `.dynstr`.
    pub fn string_at(&self, index: usize) -> String {
        let strtab = match self.section(".strtab").or_else(|| self.section(".dynstr")) {
            Some(s) => s,
            None => return String::new(),
        };
        read_cstr(&self.map, strtab.sh_offset as usize + index)
    }

    /// The name of a symbol from this file's symbol table.
    pub fn symbol_name(&self, symbol: &Symbol) -> String {
        self.string_at(symbol.st_name as usize)
    }

    /// The section header with the given name, if present.
    pub fn section(&self, name: &str) -> Option<&SectionHeader> {
        self.section_by_name
            .get(name)
            .map(|&index| &self.section_headers[index])
    }

    /// The file address at which the named section starts.
    pub fn section_start_address(&self, name: &str) -> Option<FileAddr<'_>> {
        self.section(name)
            .map(|section| FileAddr::new(section.sh_addr, self))
    }

    /// The raw bytes of the named section, as mapped.
    pub fn section_contents(&self, name: &str) -> Option<&[u8]> {
        let section = self.section(name)?;
        self.map
            .get(section.sh_offset as usize..(section.sh_offset + section.sh_size) as usize)
    }

    /// The section whose loaded range covers the given virtual address.
    pub fn section_containing_virt(&self, addr: VirtAddr) -> Option<&SectionHeader> {
        let bias = self.load_bias.u64();
        self.section_headers.iter().find(|section| {
            bias + section.sh_addr <= addr.u64()
                && addr.u64() < bias + section.sh_addr + section.sh_size
        })
    }

    /// The section whose on-disk range covers the given file address.
    pub fn section_containing_file(&self, addr: FileAddr<'_>) -> Option<&SectionHeader> {
        if !std::ptr::eq(addr.elf_file(), self) {
            return None;
        }
        self.section_headers.iter().find(|section| {
            section.sh_addr <= addr.addr() && addr.addr() < section.sh_addr + section.sh_size
        })
    }

    /// All symbols carrying the given name, mangled or demangled.
    pub fn symbols_by_name(&self, name: &str) -> Vec<&Symbol> {
        self.symbols_by_name
            .get(name)
            .map(|indices| indices.iter().map(|&i| &self.symbols[i]).collect())
            .unwrap_or_default()
    }

    /// The symbol whose range starts exactly at the given file address.
    pub fn symbol_at_address(&self, addr: FileAddr<'_>) -> Option<&Symbol> {
        if !std::ptr::eq(addr.elf_file(), self) {
            return None;
        }
        let ((lo, _), &index) = self
            .symbols_by_range
            .range((Bound::Included((addr.addr(), 0)), Bound::Unbounded))
            .next()?;
        (*lo == addr.addr()).then(|| &self.symbols[index])
    }

    /// The symbol whose `[lo, hi)` range contains the given file address.
    pub fn symbol_containing_file_addr(&self, addr: FileAddr<'_>) -> Option<&Symbol> {
        if !std::ptr::eq(addr.elf_file(), self) || self.symbols_by_range.is_empty() {
            return None;
        }

        let key = (addr.addr(), 0);
        if let Some(((lo, _), &index)) = self
            .symbols_by_range
            .range((Bound::Included(key), Bound::Unbounded))
            .next()
        {
            if *lo == addr.addr() {
                return Some(&self.symbols[index]);
            }
        }

        // Otherwise the covering range, if any, starts before the address.
        let ((lo, hi), &index) = self.symbols_by_range.range(..key).next_back()?;
        (*lo <= addr.addr() && addr.addr() < *hi).then(|| &self.symbols[index])
    }

    /// The symbol whose range contains the given virtual address.
    pub fn symbol_containing_virt_addr(&self, addr: VirtAddr) -> Option<&Symbol> {
        self.symbol_containing_file_addr(addr.to_file_addr(self)?)
    }
}
