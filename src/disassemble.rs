//! Disassembly as a pure function: a byte buffer plus its base address in,
//! a list of addressed instruction texts out.

use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

use crate::addr::VirtAddr;

const CODE_BITNESS: u32 = 64;

/// The longest legal x86-64 instruction, used to size read-ahead buffers.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// One decoded instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub address: VirtAddr,
    pub text: String,
}

/// Decodes `data` as x86-64 code starting at `base`.
///
/// Callers that want trap-free text must pass bytes read through
/// `read_memory_without_traps`, otherwise enabled software breakpoints show
/// up as `int3`.
pub fn disassemble(data: &[u8], base: VirtAddr) -> Vec<Instruction> {
    let mut decoder = Decoder::with_ip(CODE_BITNESS, data, base.u64(), DecoderOptions::NONE);

    let mut formatter = NasmFormatter::new();
    formatter.options_mut().set_first_operand_char_index(8);

    let mut out = Vec::new();
    while decoder.can_decode() {
        let instruction = decoder.decode();
        let mut text = String::new();
        formatter.format(&instruction, &mut text);
        out.push(Instruction {
            address: VirtAddr::from(instruction.ip()),
            text,
        });
    }
    out
}
