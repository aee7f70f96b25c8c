//! ELF view tests against real binaries: the test executable itself (which
//! carries a symbol table and DWARF) and whatever `true` resolves to.

use std::path::PathBuf;

use lodeminer::addr::{FileAddr, VirtAddr};
use lodeminer::dwarf::DwarfInfo;
use lodeminer::elf::{ElfFile, STT_FUNC};

const EM_X86_64: u16 = 62;

fn own_binary() -> ElfFile {
    let path = std::env::current_exe().unwrap();
    ElfFile::open(path).unwrap()
}

fn find_in_path(name: &str) -> PathBuf {
    std::env::var("PATH")
        .unwrap_or_default()
        .split(':')
        .map(|dir| PathBuf::from(dir).join(name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| panic!("{name} not found in PATH"))
}

#[test]
fn parses_header_and_sections() {
    let elf = own_binary();
    assert_eq!(elf.header().e_machine, EM_X86_64);
    assert_ne!(elf.header().e_entry, 0);

    let text = elf.section(".text").expect("no .text section");
    assert_ne!(text.sh_size, 0);
    assert_eq!(elf.section_name(text), ".text");
    assert!(elf.section(".does-not-exist").is_none());

    let contents = elf.section_contents(".text").unwrap();
    assert_eq!(contents.len(), text.sh_size as usize);
}

#[test]
fn entry_point_lies_in_a_section() {
    let elf = own_binary();
    let entry = elf.entry_point();
    let section = elf.section_containing_file(entry).expect("entry outside any section");
    assert!(section.sh_addr <= entry.addr());
}

#[test]
fn address_translation_round_trips() {
    let mut elf = own_binary();
    // A fixed fake bias stands in for a real mapping.
    elf.notify_loaded(VirtAddr::from(0x5000_0000u64));

    let entry = FileAddr::new(elf.header().e_entry, &elf);
    let virt = entry.to_virt_addr().expect("entry not covered by a section");
    assert_eq!(virt.u64(), 0x5000_0000 + elf.header().e_entry);

    let back = virt.to_file_addr(&elf).expect("virt address not covered");
    assert_eq!(back, entry);

    // Addresses outside every section refuse to translate.
    assert!(FileAddr::new(1, &elf).to_virt_addr().is_none());
}

#[test]
fn finds_symbols_by_name_and_address() {
    let elf = own_binary();

    let mains = elf.symbols_by_name("main");
    assert!(!mains.is_empty(), "test binary has no `main` symbol");
    let main = mains
        .iter()
        .find(|sym| sym.st_value != 0 && sym.st_size != 0)
        .expect("no defined main");
    assert_eq!(main.symbol_type(), STT_FUNC);

    let start = FileAddr::new(main.st_value, &elf);
    let found = elf.symbol_at_address(start).expect("no symbol at main's address");
    assert_eq!(found.st_value, main.st_value);

    let mid = FileAddr::new(main.st_value + main.st_size / 2, &elf);
    let containing = elf
        .symbol_containing_file_addr(mid)
        .expect("no symbol contains the middle of main");
    assert_eq!(containing.st_value, main.st_value);

    let past_end = FileAddr::new(main.st_value + main.st_size, &elf);
    let past = elf.symbol_containing_file_addr(past_end);
    assert!(past.is_none() || past.unwrap().st_value != main.st_value);
}

#[test]
fn opens_a_system_binary() {
    let elf = ElfFile::open(find_in_path("true")).unwrap();
    assert_eq!(elf.header().e_machine, EM_X86_64);
    assert!(elf.section(".text").is_some());
}

#[test]
fn dwarf_function_index_covers_main() {
    let elf = own_binary();
    let dwarf = DwarfInfo::build(&elf).expect("test binary carries DWARF");

    let mains = dwarf.functions_by_name("main");
    assert!(!mains.is_empty(), "DWARF index has no `main`");
    let main = mains[0];
    assert!(main.low_pc < main.high_pc);
    assert!(dwarf.function_containing(main.low_pc).is_some());
}
