//! Static description of every register the kernel exposes in the per-task
//! user area: general-purpose registers (with their 32/16/8-bit sub views),
//! the x87/SSE state, and the eight debug registers.
//!
//! The table is the single source of truth for register layout. Offsets are
//! computed from the `libc::user` structure the kernel fills for
//! `PTRACE_PEEKUSER`/`PTRACE_POKEUSER`, so they track libc exactly instead
//! of hardcoding magic numbers.

use std::mem::offset_of;

use libc::{user, user_fpregs_struct, user_regs_struct};

/// Identifies one register in the table.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId {
    // 64-bit general purpose
    rax, rdx, rcx, rbx, rsi, rdi, rbp, rsp,
    r8, r9, r10, r11, r12, r13, r14, r15,
    rip, eflags, cs, fs, gs, ss, ds, es,
    orig_rax, fs_base, gs_base,
    // 32-bit views
    eax, edx, ecx, ebx, esi, edi, ebp, esp,
    r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
    // 16-bit views
    ax, dx, cx, bx, si, di, bp, sp,
    r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w,
    // 8-bit high views
    ah, dh, ch, bh,
    // 8-bit low views
    al, dl, cl, bl, sil, dil, bpl, spl,
    r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
    // x87 control/status
    fcw, fsw, ftw, fop, frip, frdp, mxcsr, mxcsrmask,
    // x87 data, MMX aliases, SSE
    st0, st1, st2, st3, st4, st5, st6, st7,
    mm0, mm1, mm2, mm3, mm4, mm5, mm6, mm7,
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7,
    xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15,
    // debug registers
    dr0, dr1, dr2, dr3, dr4, dr5, dr6, dr7,
}

/// Which block of the user area a register lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Gpr,
    SubGpr,
    Fpr,
    Dr,
}

/// How the raw bytes of a register are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFormat {
    Uint,
    DoubleFloat,
    LongDouble,
    Vector,
}

/// Layout and interpretation of one register.
#[derive(Debug, Clone, Copy)]
pub struct RegisterInfo {
    pub id: RegisterId,
    pub name: &'static str,
    pub dwarf_id: i32,
    pub size: usize,
    pub offset: usize,
    pub reg_type: RegisterType,
    pub format: RegisterFormat,
}

const GPR_BASE: usize = offset_of!(user, regs);
const FPR_BASE: usize = offset_of!(user, i387);
const DR_BASE: usize = offset_of!(user, u_debugreg);
const ST_BASE: usize = FPR_BASE + offset_of!(user_fpregs_struct, st_space);
const XMM_BASE: usize = FPR_BASE + offset_of!(user_fpregs_struct, xmm_space);

macro_rules! gpr64 {
    ($name:ident, $dwarf:expr) => {
        RegisterInfo {
            id: RegisterId::$name,
            name: stringify!($name),
            dwarf_id: $dwarf,
            size: 8,
            offset: GPR_BASE + offset_of!(user_regs_struct, $name),
            reg_type: RegisterType::Gpr,
            format: RegisterFormat::Uint,
        }
    };
}

macro_rules! sub_gpr {
    ($name:ident, $base:ident, $size:expr, $byte_offset:expr) => {
        RegisterInfo {
            id: RegisterId::$name,
            name: stringify!($name),
            dwarf_id: -1,
            size: $size,
            offset: GPR_BASE + offset_of!(user_regs_struct, $base) + $byte_offset,
            reg_type: RegisterType::SubGpr,
            format: RegisterFormat::Uint,
        }
    };
}

macro_rules! fpr {
    ($name:ident, $dwarf:expr, $size:expr, $field:ident) => {
        RegisterInfo {
            id: RegisterId::$name,
            name: stringify!($name),
            dwarf_id: $dwarf,
            size: $size,
            offset: FPR_BASE + offset_of!(user_fpregs_struct, $field),
            reg_type: RegisterType::Fpr,
            format: RegisterFormat::Uint,
        }
    };
}

macro_rules! fp_st {
    ($name:ident, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$name,
            name: stringify!($name),
            dwarf_id: 33 + $n,
            size: 16,
            offset: ST_BASE + 16 * $n,
            reg_type: RegisterType::Fpr,
            format: RegisterFormat::LongDouble,
        }
    };
}

macro_rules! fp_mm {
    ($name:ident, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$name,
            name: stringify!($name),
            dwarf_id: 41 + $n,
            size: 8,
            offset: ST_BASE + 16 * $n,
            reg_type: RegisterType::Fpr,
            format: RegisterFormat::Vector,
        }
    };
}

macro_rules! fp_xmm {
    ($name:ident, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$name,
            name: stringify!($name),
            dwarf_id: 17 + $n,
            size: 16,
            offset: XMM_BASE + 16 * $n,
            reg_type: RegisterType::Fpr,
            format: RegisterFormat::Vector,
        }
    };
}

macro_rules! dr {
    ($name:ident, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$name,
            name: stringify!($name),
            dwarf_id: -1,
            size: 8,
            offset: DR_BASE + 8 * $n,
            reg_type: RegisterType::Dr,
            format: RegisterFormat::Uint,
        }
    };
}

/// Info of every register exposed to the debugger, in table order.
pub static REGISTER_INFOS: &[RegisterInfo] = &[
    gpr64!(rax, 0),
    gpr64!(rdx, 1),
    gpr64!(rcx, 2),
    gpr64!(rbx, 3),
    gpr64!(rsi, 4),
    gpr64!(rdi, 5),
    gpr64!(rbp, 6),
    gpr64!(rsp, 7),
    gpr64!(r8, 8),
    gpr64!(r9, 9),
    gpr64!(r10, 10),
    gpr64!(r11, 11),
    gpr64!(r12, 12),
    gpr64!(r13, 13),
    gpr64!(r14, 14),
    gpr64!(r15, 15),
    gpr64!(rip, 16),
    gpr64!(eflags, 49),
    gpr64!(cs, 51),
    gpr64!(fs, 54),
    gpr64!(gs, 55),
    gpr64!(ss, 52),
    gpr64!(ds, 53),
    gpr64!(es, 50),
    gpr64!(orig_rax, -1),
    gpr64!(fs_base, 58),
    gpr64!(gs_base, 59),
    sub_gpr!(eax, rax, 4, 0),
    sub_gpr!(edx, rdx, 4, 0),
    sub_gpr!(ecx, rcx, 4, 0),
    sub_gpr!(ebx, rbx, 4, 0),
    sub_gpr!(esi, rsi, 4, 0),
    sub_gpr!(edi, rdi, 4, 0),
    sub_gpr!(ebp, rbp, 4, 0),
    sub_gpr!(esp, rsp, 4, 0),
    sub_gpr!(r8d, r8, 4, 0),
    sub_gpr!(r9d, r9, 4, 0),
    sub_gpr!(r10d, r10, 4, 0),
    sub_gpr!(r11d, r11, 4, 0),
    sub_gpr!(r12d, r12, 4, 0),
    sub_gpr!(r13d, r13, 4, 0),
    sub_gpr!(r14d, r14, 4, 0),
    sub_gpr!(r15d, r15, 4, 0),
    sub_gpr!(ax, rax, 2, 0),
    sub_gpr!(dx, rdx, 2, 0),
    sub_gpr!(cx, rcx, 2, 0),
    sub_gpr!(bx, rbx, 2, 0),
    sub_gpr!(si, rsi, 2, 0),
    sub_gpr!(di, rdi, 2, 0),
    sub_gpr!(bp, rbp, 2, 0),
    sub_gpr!(sp, rsp, 2, 0),
    sub_gpr!(r8w, r8, 2, 0),
    sub_gpr!(r9w, r9, 2, 0),
    sub_gpr!(r10w, r10, 2, 0),
    sub_gpr!(r11w, r11, 2, 0),
    sub_gpr!(r12w, r12, 2, 0),
    sub_gpr!(r13w, r13, 2, 0),
    sub_gpr!(r14w, r14, 2, 0),
    sub_gpr!(r15w, r15, 2, 0),
    sub_gpr!(ah, rax, 1, 1),
    sub_gpr!(dh, rdx, 1, 1),
    sub_gpr!(ch, rcx, 1, 1),
    sub_gpr!(bh, rbx, 1, 1),
    sub_gpr!(al, rax, 1, 0),
    sub_gpr!(dl, rdx, 1, 0),
    sub_gpr!(cl, rcx, 1, 0),
    sub_gpr!(bl, rbx, 1, 0),
    sub_gpr!(sil, rsi, 1, 0),
    sub_gpr!(dil, rdi, 1, 0),
    sub_gpr!(bpl, rbp, 1, 0),
    sub_gpr!(spl, rsp, 1, 0),
    sub_gpr!(r8b, r8, 1, 0),
    sub_gpr!(r9b, r9, 1, 0),
    sub_gpr!(r10b, r10, 1, 0),
    sub_gpr!(r11b, r11, 1, 0),
    sub_gpr!(r12b, r12, 1, 0),
    sub_gpr!(r13b, r13, 1, 0),
    sub_gpr!(r14b, r14, 1, 0),
    sub_gpr!(r15b, r15, 1, 0),
    fpr!(fcw, 65, 2, cwd),
    fpr!(fsw, 66, 2, swd),
    fpr!(ftw, -1, 2, ftw),
    fpr!(fop, -1, 2, fop),
    fpr!(frip, -1, 8, rip),
    fpr!(frdp, -1, 8, rdp),
    fpr!(mxcsr, 64, 4, mxcsr),
    fpr!(mxcsrmask, -1, 4, mxcr_mask),
    fp_st!(st0, 0),
    fp_st!(st1, 1),
    fp_st!(st2, 2),
    fp_st!(st3, 3),
    fp_st!(st4, 4),
    fp_st!(st5, 5),
    fp_st!(st6, 6),
    fp_st!(st7, 7),
    fp_mm!(mm0, 0),
    fp_mm!(mm1, 1),
    fp_mm!(mm2, 2),
    fp_mm!(mm3, 3),
    fp_mm!(mm4, 4),
    fp_mm!(mm5, 5),
    fp_mm!(mm6, 6),
    fp_mm!(mm7, 7),
    fp_xmm!(xmm0, 0),
    fp_xmm!(xmm1, 1),
    fp_xmm!(xmm2, 2),
    fp_xmm!(xmm3, 3),
    fp_xmm!(xmm4, 4),
    fp_xmm!(xmm5, 5),
    fp_xmm!(xmm6, 6),
    fp_xmm!(xmm7, 7),
    fp_xmm!(xmm8, 8),
    fp_xmm!(xmm9, 9),
    fp_xmm!(xmm10, 10),
    fp_xmm!(xmm11, 11),
    fp_xmm!(xmm12, 12),
    fp_xmm!(xmm13, 13),
    fp_xmm!(xmm14, 14),
    fp_xmm!(xmm15, 15),
    dr!(dr0, 0),
    dr!(dr1, 1),
    dr!(dr2, 2),
    dr!(dr3, 3),
    dr!(dr4, 4),
    dr!(dr5, 5),
    dr!(dr6, 6),
    dr!(dr7, 7),
];

/// The eight debug registers, in index order.
pub const DEBUG_REGISTER_IDS: [RegisterId; 8] = [
    RegisterId::dr0,
    RegisterId::dr1,
    RegisterId::dr2,
    RegisterId::dr3,
    RegisterId::dr4,
    RegisterId::dr5,
    RegisterId::dr6,
    RegisterId::dr7,
];

/// Argument registers of the x86-64 Linux syscall calling convention.
pub const SYSCALL_ARG_REGISTER_IDS: [RegisterId; 6] = [
    RegisterId::rdi,
    RegisterId::rsi,
    RegisterId::rdx,
    RegisterId::r10,
    RegisterId::r8,
    RegisterId::r9,
];

/// Looks up the table entry for a register id.
pub fn register_info_by_id(id: RegisterId) -> &'static RegisterInfo {
    REGISTER_INFOS
        .iter()
        .find(|info| info.id == id)
        .expect("the register table covers every RegisterId")
}

/// Looks up a register by its user-facing name.
pub fn register_info_by_name(name: &str) -> Option<&'static RegisterInfo> {
    REGISTER_INFOS.iter().find(|info| info.name == name)
}

/// Looks up a register by its DWARF register number.
pub fn register_info_by_dwarf(dwarf_id: i32) -> Option<&'static RegisterInfo> {
    if dwarf_id < 0 {
        return None;
    }
    REGISTER_INFOS.iter().find(|info| info.dwarf_id == dwarf_id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let rip = register_info_by_name("rip").unwrap();
        assert_eq!(rip.id, RegisterId::rip);
        assert_eq!(rip.size, 8);
        assert!(register_info_by_name("nonsense").is_none());
    }

    #[test]
    fn test_sub_register_offsets_share_base() {
        let rax = register_info_by_id(RegisterId::rax);
        let eax = register_info_by_id(RegisterId::eax);
        let ah = register_info_by_id(RegisterId::ah);
        assert_eq!(rax.offset, eax.offset);
        assert_eq!(rax.offset + 1, ah.offset);
    }

    #[test]
    fn test_debug_registers_are_contiguous() {
        let dr0 = register_info_by_id(RegisterId::dr0);
        for (i, id) in DEBUG_REGISTER_IDS.iter().enumerate() {
            let info = register_info_by_id(*id);
            assert_eq!(info.offset, dr0.offset + 8 * i);
            assert_eq!(info.size, 8);
        }
    }

    #[test]
    fn test_mm_aliases_st() {
        let st0 = register_info_by_id(RegisterId::st0);
        let mm0 = register_info_by_id(RegisterId::mm0);
        assert_eq!(st0.offset, mm0.offset);
        assert_eq!(mm0.size, 8);
        assert_eq!(st0.size, 16);
    }

    #[test]
    fn test_dwarf_lookup() {
        assert_eq!(register_info_by_dwarf(0).unwrap().id, RegisterId::rax);
        assert_eq!(register_info_by_dwarf(16).unwrap().id, RegisterId::rip);
        assert!(register_info_by_dwarf(-1).is_none());
    }
}
