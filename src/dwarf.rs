//! Minimal DWARF consumption: a function index.
//!
//! The engine only needs DWARF for symbol lookup — mapping an address to
//! the function that contains it and finding functions by name. Everything
//! is read once at load time into owned records, so nothing borrows the
//! gimli reader afterwards.

use std::rc::Rc;

use gimli::{AttributeValue, Reader, Unit};
use tracing::debug;

use crate::elf::ElfFile;
use crate::errors::Result;

// the gimli::Reader we use
type GimliRd = gimli::EndianRcSlice<gimli::LittleEndian>;

/// One `DW_TAG_subprogram` with a code range, addresses as in the file.
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    pub name: Option<String>,
    pub low_pc: u64,
    pub high_pc: u64,
}

/// Function index built from the `.debug_*` sections of one ELF.
pub struct DwarfInfo {
    functions: Vec<FunctionRecord>,
}

impl DwarfInfo {
    /// Loads the DWARF sections out of `elf` and indexes its functions.
    pub fn build(elf: &ElfFile) -> Result<Self> {
        let dwarf = gimli::Dwarf::load(
            |section| -> std::result::Result<GimliRd, gimli::Error> {
                let data = elf.section_contents(section.name()).unwrap_or(&[]);
                Ok(GimliRd::new(Rc::from(data), gimli::LittleEndian))
            },
        )?;

        let mut functions = Vec::new();
        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            Self::index_unit(&dwarf, &unit, &mut functions)?;
        }

        debug!("indexed {} DWARF functions", functions.len());
        Ok(DwarfInfo { functions })
    }

    fn index_unit(
        dwarf: &gimli::Dwarf<GimliRd>,
        unit: &Unit<GimliRd>,
        functions: &mut Vec<FunctionRecord>,
    ) -> Result<()> {
        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }

            let low_pc = match entry.attr(gimli::DW_AT_low_pc)? {
                Some(attr) => dwarf.attr_address(unit, attr.value())?,
                None => None,
            };
            let Some(low_pc) = low_pc else { continue };

            let high_pc = match entry.attr(gimli::DW_AT_high_pc)? {
                Some(attr) => match attr.value() {
                    // An offset from low_pc is by far the common encoding.
                    AttributeValue::Udata(offset) => Some(low_pc + offset),
                    value => dwarf.attr_address(unit, value)?,
                },
                None => None,
            };
            let Some(high_pc) = high_pc else { continue };

            let name = match entry.attr(gimli::DW_AT_name)? {
                Some(attr) => Some(
                    dwarf
                        .attr_string(unit, attr.value())?
                        .to_string_lossy()?
                        .into_owned(),
                ),
                None => None,
            };

            functions.push(FunctionRecord {
                name,
                low_pc,
                high_pc,
            });
        }
        Ok(())
    }

    /// The function whose `[low_pc, high_pc)` range contains `file_addr`.
    pub fn function_containing(&self, file_addr: u64) -> Option<&FunctionRecord> {
        self.functions
            .iter()
            .find(|function| function.low_pc <= file_addr && file_addr < function.high_pc)
    }

    /// All indexed functions with the given name.
    pub fn functions_by_name(&self, name: &str) -> Vec<&FunctionRecord> {
        self.functions
            .iter()
            .filter(|function| function.name.as_deref() == Some(name))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_function_containing() {
        let info = DwarfInfo {
            functions: vec![
                FunctionRecord {
                    name: Some("outer".into()),
                    low_pc: 0x1000,
                    high_pc: 0x1100,
                },
                FunctionRecord {
                    name: Some("later".into()),
                    low_pc: 0x2000,
                    high_pc: 0x2040,
                },
            ],
        };
        assert_eq!(
            info.function_containing(0x1080).unwrap().name.as_deref(),
            Some("outer")
        );
        assert!(info.function_containing(0x1100).is_none());
        assert_eq!(info.functions_by_name("later").len(), 1);
        assert!(info.functions_by_name("missing").is_empty());
    }
}
