//! Value parsing at the core surface.
//!
//! Register writes accept hexadecimal integers (with or without `0x`),
//! decimal floats, and bracketed byte vectors of the form
//! `[0xHH,0xHH,…]` whose length must equal the register's byte width.
//! Anything else fails with [`DebuggerError::InvalidFormat`].

use crate::errors::{DebuggerError, Result};
use crate::register_info::{RegisterFormat, RegisterInfo};
use crate::registers::RegisterValue;

/// Parses a hexadecimal integer, tolerating a leading `0x`.
pub fn parse_hex(raw: &str) -> Result<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|_| DebuggerError::InvalidFormat(format!("not a hexadecimal integer: {raw}")))
}

/// Parses a single `0xHH` byte.
fn parse_hex_byte(raw: &str) -> Result<u8> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u8::from_str_radix(digits, 16)
        .map_err(|_| DebuggerError::InvalidFormat(format!("not a byte: {raw}")))
}

/// Parses a comma-separated `[0xHH,0xHH,…]` vector.
pub fn parse_byte_vector(text: &str) -> Result<Vec<u8>> {
    let invalid = || DebuggerError::InvalidFormat(format!("not a byte vector: {text}"));
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(invalid)?;
    if inner.trim().is_empty() {
        return Err(invalid());
    }
    inner
        .split(',')
        .map(|element| parse_hex_byte(element.trim()))
        .collect()
}

/// Parses a textual value for the given register.
pub fn parse_register_value(info: &RegisterInfo, text: &str) -> Result<RegisterValue> {
    match info.format {
        RegisterFormat::Uint => {
            let value = parse_hex(text)?;
            Ok(match info.size {
                1 => RegisterValue::U8(value as u8),
                2 => RegisterValue::U16(value as u16),
                4 => RegisterValue::U32(value as u32),
                _ => RegisterValue::U64(value),
            })
        }
        RegisterFormat::DoubleFloat | RegisterFormat::LongDouble => text
            .parse::<f64>()
            .map(RegisterValue::F64)
            .map_err(|_| DebuggerError::InvalidFormat(format!("not a float: {text}"))),
        RegisterFormat::Vector => {
            let bytes = parse_byte_vector(text)?;
            if bytes.len() != info.size {
                return Err(DebuggerError::InvalidFormat(format!(
                    "{} takes {} bytes, got {}",
                    info.name,
                    info.size,
                    bytes.len()
                )));
            }
            Ok(if info.size == 8 {
                RegisterValue::Byte64(bytes.try_into().unwrap())
            } else {
                RegisterValue::Byte128(bytes.try_into().unwrap())
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::register_info::register_info_by_name;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("19").unwrap(), 0x19);
        assert_eq!(parse_hex("0x19").unwrap(), 0x19);
        assert_eq!(parse_hex("0x00019").unwrap(), 0x19);
        assert!(parse_hex("frog").is_err());
    }

    #[test]
    fn test_parse_byte_vector() {
        assert_eq!(
            parse_byte_vector("[0xca,0xfe]").unwrap(),
            vec![0xca, 0xfe]
        );
        assert!(parse_byte_vector("0xca,0xfe").is_err());
        assert!(parse_byte_vector("[]").is_err());
        assert!(parse_byte_vector("[0xgg]").is_err());
    }

    #[test]
    fn test_parse_register_values() {
        let rsi = register_info_by_name("rsi").unwrap();
        assert_eq!(
            parse_register_value(rsi, "0xcafecafe").unwrap(),
            RegisterValue::U64(0xcafecafe)
        );

        let st0 = register_info_by_name("st0").unwrap();
        assert_eq!(
            parse_register_value(st0, "42.24").unwrap(),
            RegisterValue::F64(42.24)
        );

        let mm0 = register_info_by_name("mm0").unwrap();
        assert_eq!(
            parse_register_value(mm0, "[0x01,0x02,0x03,0x04,0x05,0x06,0x07,0x08]").unwrap(),
            RegisterValue::Byte64([1, 2, 3, 4, 5, 6, 7, 8])
        );
        assert!(parse_register_value(mm0, "[0x01,0x02]").is_err());
        assert!(parse_register_value(rsi, "pudding").is_err());
    }
}
