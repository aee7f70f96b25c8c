//! Binds one traced [`Process`] to the [`ElfFile`] it was loaded from.
//!
//! On launch or attach the auxiliary vector tells us where the kernel
//! actually placed the entry point; the difference against the ELF header's
//! `e_entry` is the load bias, and publishing it to the ELF view makes
//! file ⇄ virtual address translation meaningful.

use std::path::Path;

use nix::unistd::Pid;
use std::os::fd::OwnedFd;
use tracing::warn;

use crate::addr::VirtAddr;
use crate::disassemble::{self, Instruction, MAX_INSTRUCTION_LEN};
use crate::dwarf::DwarfInfo;
use crate::elf::{ElfFile, STT_FUNC};
use crate::errors::Result;
use crate::process::Process;

/// AT_ENTRY tag in the auxiliary vector.
const AT_ENTRY: u64 = 9;

/// One debugging session: a process plus its main executable's metadata.
pub struct Target {
    process: Process,
    elf: ElfFile,
    dwarf: Option<DwarfInfo>,
}

fn create_loaded_elf(process: &Process, path: impl AsRef<Path>) -> Result<ElfFile> {
    let auxv = process.get_auxv()?;
    let mut elf = ElfFile::open(path)?;
    if let Some(entry) = auxv.get(&AT_ENTRY) {
        elf.notify_loaded(VirtAddr::from(entry - elf.header().e_entry));
    }
    Ok(elf)
}

fn load_dwarf(elf: &ElfFile) -> Option<DwarfInfo> {
    match DwarfInfo::build(elf) {
        Ok(info) => Some(info),
        Err(e) => {
            // Stripped binaries are everyday debugging targets.
            warn!("no usable DWARF debug information: {e}");
            None
        }
    }
}

impl Target {
    /// Launches `path` under trace and loads its ELF metadata.
    pub fn launch(
        path: impl AsRef<Path>,
        args: &[String],
        stdout_replacement: Option<OwnedFd>,
    ) -> Result<Self> {
        let process = Process::launch(&path, args, true, stdout_replacement)?;
        let elf = create_loaded_elf(&process, &path)?;
        let dwarf = load_dwarf(&elf);
        Ok(Target {
            process,
            elf,
            dwarf,
        })
    }

    /// Attaches to a running pid, reading its executable via `/proc`.
    pub fn attach(pid: Pid) -> Result<Self> {
        let elf_path = format!("/proc/{pid}/exe");
        let process = Process::attach(pid)?;
        let elf = create_loaded_elf(&process, elf_path)?;
        let dwarf = load_dwarf(&elf);
        Ok(Target {
            process,
            elf,
            dwarf,
        })
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut Process {
        &mut self.process
    }

    pub fn elf(&self) -> &ElfFile {
        &self.elf
    }

    /// The inferior's entry point as a runtime address.
    pub fn entry_point(&self) -> VirtAddr {
        VirtAddr::from(self.elf.load_bias().u64() + self.elf.header().e_entry)
    }

    /// Names the function containing `address`, preferring the ELF symbol
    /// table and falling back to the DWARF function index.
    pub fn function_name_at(&self, address: VirtAddr) -> Option<String> {
        if let Some(symbol) = self.elf.symbol_containing_virt_addr(address) {
            if symbol.symbol_type() == STT_FUNC {
                let mangled = self.elf.symbol_name(symbol);
                return Some(format!("{:#}", rustc_demangle::demangle(&mangled)));
            }
        }

        let file_addr = address.to_file_addr(&self.elf)?;
        self.dwarf
            .as_ref()?
            .function_containing(file_addr.addr())?
            .name
            .clone()
    }

    /// Resolves a symbol name to a runtime address, via the ELF symbol
    /// table first and the DWARF function index second.
    pub fn resolve_symbol(&self, name: &str) -> Option<VirtAddr> {
        for symbol in self.elf.symbols_by_name(name) {
            if symbol.st_value != 0 {
                return Some(VirtAddr::from(self.elf.load_bias().u64() + symbol.st_value));
            }
        }
        self.dwarf
            .as_ref()?
            .functions_by_name(name)
            .first()
            .map(|function| VirtAddr::from(self.elf.load_bias().u64() + function.low_pc))
    }

    /// Disassembles `n_instructions` starting at `address` (default: pc),
    /// papering over software breakpoint bytes.
    pub fn disassemble(
        &self,
        n_instructions: usize,
        address: Option<VirtAddr>,
    ) -> Result<Vec<Instruction>> {
        let address = address.unwrap_or_else(|| self.process.get_pc());
        let code = self
            .process
            .read_memory_without_traps(address, n_instructions * MAX_INSTRUCTION_LEN)?;
        let mut instructions = disassemble::disassemble(&code, address);
        instructions.truncate(n_instructions);
        Ok(instructions)
    }
}
