//! Typed view over the captured user area of a traced task.
//!
//! The raw bytes live in a `libc::user` block that is re-read from the
//! kernel on every stop. Reads interpret a region according to the table in
//! [`crate::register_info`]; writes widen the incoming value to the
//! destination and flush either the whole floating-point block or the
//! 8-byte-aligned word containing the change.

use std::fmt::Display;
use std::mem;

use libc::user;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::{DebuggerError, Result};
use crate::register_info::{
    register_info_by_id, RegisterFormat, RegisterId, RegisterInfo, RegisterType,
    DEBUG_REGISTER_IDS,
};

/// A value read from or written to a register.
///
/// The x87 data registers hold 80-bit extended floats; Rust has no native
/// type for those, so they travel as raw 16-byte slots with
/// [`f64_to_f80_bytes`]/[`f80_bytes_to_f64`] doing the conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Byte64([u8; 8]),
    Byte128([u8; 16]),
    LongDouble([u8; 16]),
}

impl RegisterValue {
    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        match self {
            RegisterValue::U8(_) | RegisterValue::I8(_) => 1,
            RegisterValue::U16(_) | RegisterValue::I16(_) => 2,
            RegisterValue::U32(_) | RegisterValue::I32(_) | RegisterValue::F32(_) => 4,
            RegisterValue::U64(_)
            | RegisterValue::I64(_)
            | RegisterValue::F64(_)
            | RegisterValue::Byte64(_) => 8,
            RegisterValue::Byte128(_) | RegisterValue::LongDouble(_) => 16,
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, RegisterValue::F32(_) | RegisterValue::F64(_))
    }

    fn as_f64(&self) -> f64 {
        match self {
            RegisterValue::F32(v) => f64::from(*v),
            RegisterValue::F64(v) => *v,
            _ => unreachable!("as_f64 on a non-float value"),
        }
    }

    fn raw_le_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        match *self {
            RegisterValue::U8(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::U16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::U32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::U64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I8(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::F32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::F64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::Byte64(v) => out[..8].copy_from_slice(&v),
            RegisterValue::Byte128(v) | RegisterValue::LongDouble(v) => out = v,
        }
        out
    }

    fn sign_extended_le_bytes(&self) -> Option<[u8; 16]> {
        let wide: i64 = match *self {
            RegisterValue::I8(v) => i64::from(v),
            RegisterValue::I16(v) => i64::from(v),
            RegisterValue::I32(v) => i64::from(v),
            RegisterValue::I64(v) => v,
            _ => return None,
        };
        let mut out = [if wide < 0 { 0xff } else { 0 }; 16];
        out[..8].copy_from_slice(&wide.to_le_bytes());
        Some(out)
    }

    /// Widens the value to fill a destination register, per its format.
    ///
    /// Signed integers sign-extend into `uint` destinations, unsigned ones
    /// zero-extend, floats convert to the destination precision, and vector
    /// destinations take the raw bytes zero-filled.
    fn widen(&self, info: &RegisterInfo) -> Result<[u8; 16]> {
        match info.format {
            RegisterFormat::DoubleFloat => {
                if !self.is_float() {
                    return Err(DebuggerError::InvalidFormat(format!(
                        "{} takes a floating point value",
                        info.name
                    )));
                }
                Ok(RegisterValue::F64(self.as_f64()).raw_le_bytes())
            }
            RegisterFormat::LongDouble => {
                if let RegisterValue::LongDouble(raw) = self {
                    return Ok(*raw);
                }
                if !self.is_float() {
                    return Err(DebuggerError::InvalidFormat(format!(
                        "{} takes a floating point value",
                        info.name
                    )));
                }
                Ok(f64_to_f80_bytes(self.as_f64()))
            }
            RegisterFormat::Uint => {
                if self.is_float() {
                    return Err(DebuggerError::InvalidFormat(format!(
                        "{} takes an integer value",
                        info.name
                    )));
                }
                Ok(self
                    .sign_extended_le_bytes()
                    .unwrap_or_else(|| self.raw_le_bytes()))
            }
            RegisterFormat::Vector => Ok(self.raw_le_bytes()),
        }
    }
}

impl Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterValue::U8(v) => write!(f, "{v:#04x}"),
            RegisterValue::U16(v) => write!(f, "{v:#06x}"),
            RegisterValue::U32(v) => write!(f, "{v:#010x}"),
            RegisterValue::U64(v) => write!(f, "{v:#018x}"),
            RegisterValue::I8(v) => write!(f, "{v}"),
            RegisterValue::I16(v) => write!(f, "{v}"),
            RegisterValue::I32(v) => write!(f, "{v}"),
            RegisterValue::I64(v) => write!(f, "{v}"),
            RegisterValue::F32(v) => write!(f, "{v}"),
            RegisterValue::F64(v) => write!(f, "{v}"),
            RegisterValue::LongDouble(raw) => write!(f, "{}", f80_bytes_to_f64(*raw)),
            RegisterValue::Byte64(bytes) => write_byte_vector(f, bytes),
            RegisterValue::Byte128(bytes) => write_byte_vector(f, bytes),
        }
    }
}

fn write_byte_vector(f: &mut std::fmt::Formatter<'_>, bytes: &[u8]) -> std::fmt::Result {
    write!(f, "[")?;
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{byte:#04x}")?;
    }
    write!(f, "]")
}

/// The register file of one traced task.
pub struct Registers {
    pid: Pid,
    data: Box<user>,
}

impl Registers {
    pub(crate) fn new(pid: Pid) -> Self {
        Registers {
            pid,
            // The user block is plain old data as far as the kernel is
            // concerned; an all-zero state is a valid "nothing read yet".
            data: Box::new(unsafe { mem::zeroed() }),
        }
    }

    pub(crate) fn pid(&self) -> Pid {
        self.pid
    }

    fn as_bytes(&self) -> &[u8] {
        let ptr = &*self.data as *const user as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, mem::size_of::<user>()) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let ptr = &mut *self.data as *mut user as *mut u8;
        unsafe { std::slice::from_raw_parts_mut(ptr, mem::size_of::<user>()) }
    }

    /// Reads a register, interpreting the bytes per the table entry.
    pub fn read(&self, info: &RegisterInfo) -> RegisterValue {
        let bytes = &self.as_bytes()[info.offset..info.offset + info.size];
        match info.format {
            RegisterFormat::Uint => match info.size {
                1 => RegisterValue::U8(bytes[0]),
                2 => RegisterValue::U16(u16::from_le_bytes(bytes.try_into().unwrap())),
                4 => RegisterValue::U32(u32::from_le_bytes(bytes.try_into().unwrap())),
                _ => RegisterValue::U64(u64::from_le_bytes(bytes.try_into().unwrap())),
            },
            RegisterFormat::DoubleFloat => {
                RegisterValue::F64(f64::from_le_bytes(bytes[..8].try_into().unwrap()))
            }
            RegisterFormat::LongDouble => RegisterValue::LongDouble(bytes.try_into().unwrap()),
            RegisterFormat::Vector if info.size == 8 => {
                RegisterValue::Byte64(bytes.try_into().unwrap())
            }
            RegisterFormat::Vector => RegisterValue::Byte128(bytes.try_into().unwrap()),
        }
    }

    pub fn read_by_id(&self, id: RegisterId) -> RegisterValue {
        self.read(register_info_by_id(id))
    }

    /// Reads an integer-format register zero-extended to 64 bits.
    pub fn read_as_u64(&self, id: RegisterId) -> u64 {
        match self.read_by_id(id) {
            RegisterValue::U8(v) => u64::from(v),
            RegisterValue::U16(v) => u64::from(v),
            RegisterValue::U32(v) => u64::from(v),
            RegisterValue::U64(v) => v,
            other => unreachable!("read_as_u64 on a non-integer register: {other:?}"),
        }
    }

    /// Writes a register and flushes the change to the inferior.
    ///
    /// Values larger than the destination are rejected with
    /// [`DebuggerError::InvalidFormat`].
    pub fn write(&mut self, info: &RegisterInfo, value: RegisterValue) -> Result<()> {
        if value.size() > info.size {
            return Err(DebuggerError::InvalidFormat(format!(
                "{}-byte value does not fit {} ({} bytes)",
                value.size(),
                info.name,
                info.size
            )));
        }

        let widened = value.widen(info)?;
        let offset = info.offset;
        let size = info.size;
        self.as_bytes_mut()[offset..offset + size].copy_from_slice(&widened[..size]);
        self.flush(info)
    }

    pub fn write_by_id(&mut self, id: RegisterId, value: RegisterValue) -> Result<()> {
        self.write(register_info_by_id(id), value)
    }

    /// Pushes a changed register down to the kernel.
    ///
    /// fpr writes flush the entire floating-point block; everything else
    /// pokes the 8-byte-aligned user word that contains the change.
    fn flush(&mut self, info: &RegisterInfo) -> Result<()> {
        if info.reg_type == RegisterType::Fpr {
            ptrace::setregset::<ptrace::regset::NT_PRFPREG>(self.pid, self.data.i387)
                .map_err(DebuggerError::ptrace("Could not write floating point registers"))?;
            return Ok(());
        }

        let aligned_offset = info.offset & !0b111;
        let word = u64::from_le_bytes(
            self.as_bytes()[aligned_offset..aligned_offset + 8]
                .try_into()
                .unwrap(),
        );
        ptrace::write_user(
            self.pid,
            aligned_offset as ptrace::AddressType,
            word as i64,
        )
        .map_err(DebuggerError::ptrace("Could not write to user area"))
    }

    /// Re-reads the entire register state from the kernel.
    ///
    /// Called on every transition into the stopped state so that reads
    /// always reflect the latest stop.
    pub(crate) fn read_all(&mut self) -> Result<()> {
        self.data.regs = ptrace::getregs(self.pid)
            .map_err(DebuggerError::ptrace("Could not read general purpose registers"))?;
        self.data.i387 = ptrace::getregset::<ptrace::regset::NT_PRFPREG>(self.pid)
            .map_err(DebuggerError::ptrace("Could not read floating point registers"))?;

        for (i, id) in DEBUG_REGISTER_IDS.iter().enumerate() {
            let info = register_info_by_id(*id);
            let data = ptrace::read_user(self.pid, info.offset as ptrace::AddressType)
                .map_err(DebuggerError::ptrace("Could not read debug registers"))?;
            self.data.u_debugreg[i] = data as u64;
        }
        Ok(())
    }
}

/// Converts an `f64` to the x87 80-bit extended format, little-endian, in a
/// 16-byte register slot.
pub fn f64_to_f80_bytes(value: f64) -> [u8; 16] {
    let bits = value.to_bits();
    let sign = ((bits >> 63) & 1) as u16;
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & 0x000f_ffff_ffff_ffff;

    let (e80, m80): (u16, u64) = if exponent == 0x7ff {
        // infinity or NaN: the integer bit must be set in x87 encoding
        (0x7fff, (1 << 63) | (fraction << 11))
    } else if exponent != 0 {
        ((exponent - 1023 + 16383) as u16, (1 << 63) | (fraction << 11))
    } else if fraction != 0 {
        // subnormal doubles normalize in the wider exponent range
        let lz = fraction.leading_zeros();
        ((15372 - lz) as u16, fraction << lz)
    } else {
        (0, 0)
    };

    let mut out = [0u8; 16];
    out[0..8].copy_from_slice(&m80.to_le_bytes());
    out[8..10].copy_from_slice(&(e80 | (sign << 15)).to_le_bytes());
    out
}

/// Converts an x87 80-bit extended value back to `f64`.
///
/// Exact for every value that started life as a double.
pub fn f80_bytes_to_f64(bytes: [u8; 16]) -> f64 {
    let mantissa = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let se = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
    let sign = if se & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from(se & 0x7fff);

    if exponent == 0 && mantissa == 0 {
        return sign * 0.0;
    }
    if exponent == 0x7fff {
        return if mantissa << 1 == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        };
    }

    // Split the power so neither factor over- or underflows prematurely.
    let p = exponent - 16383 - 63;
    sign * (mantissa as f64) * 2f64.powi(p / 2) * 2f64.powi(p - p / 2)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::register_info::register_info_by_name;

    #[test]
    fn test_f80_round_trip() {
        for v in [
            0.0f64, 1.0, -1.0, 2.5, 42.24, 64.125, 1e300, -1e-300, 5e-324, f64::MIN_POSITIVE,
        ] {
            assert_eq!(f80_bytes_to_f64(f64_to_f80_bytes(v)), v, "value {v}");
        }
        assert!(f80_bytes_to_f64(f64_to_f80_bytes(f64::INFINITY)).is_infinite());
        assert!(f80_bytes_to_f64(f64_to_f80_bytes(f64::NAN)).is_nan());
    }

    #[test]
    fn test_widen_sign_extends_into_uint() {
        let rax = register_info_by_name("rax").unwrap();
        let widened = RegisterValue::I8(-1).widen(rax).unwrap();
        assert_eq!(&widened[..8], &[0xff; 8]);

        let widened = RegisterValue::U8(0xff).widen(rax).unwrap();
        assert_eq!(&widened[..8], &[0xff, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_widen_float_into_long_double() {
        let st0 = register_info_by_name("st0").unwrap();
        let widened = RegisterValue::F64(42.24).widen(st0).unwrap();
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&widened);
        assert_eq!(f80_bytes_to_f64(raw), 42.24);
    }

    #[test]
    fn test_widen_rejects_float_into_uint() {
        let rax = register_info_by_name("rax").unwrap();
        assert!(RegisterValue::F64(1.0).widen(rax).is_err());
    }

    #[test]
    fn test_widen_int_into_vector_zero_fills() {
        let mm0 = register_info_by_name("mm0").unwrap();
        let widened = RegisterValue::U32(0xba5e_ba11).widen(mm0).unwrap();
        assert_eq!(&widened[..8], &[0x11, 0xba, 0x5e, 0xba, 0, 0, 0, 0]);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(RegisterValue::U64(0xcafe).to_string(), "0x000000000000cafe");
        assert_eq!(RegisterValue::F64(42.24).to_string(), "42.24");
        assert_eq!(
            RegisterValue::Byte64([1, 2, 3, 4, 5, 6, 7, 8]).to_string(),
            "[0x01,0x02,0x03,0x04,0x05,0x06,0x07,0x08]"
        );
    }
}
