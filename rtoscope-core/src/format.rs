//! Small helpers shared by kernel integrations and hosts.

use crate::target::TargetAccess;

/// Decode a NUL-terminated byte buffer, replacing invalid UTF-8.
pub fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// `0x`-prefixed lowercase hex, zero padded to 8 digits like target addresses.
pub fn hex32(value: u64) -> String {
    format!("0x{value:08x}")
}

/// Whether every symbol in `names` exists. Symbols missing from the image
/// are logged at debug level, since detection runs continuously.
pub fn all_symbols_exist<S: AsRef<str>>(target: &dyn TargetAccess, names: &[S]) -> bool {
    for name in names {
        if !target.symbol_exists(name.as_ref()) {
            log::debug!("Symbol `{}` not found", name.as_ref());
            return false;
        }
    }
    true
}

/// Parse `0x1234` or `4660`.
pub fn parse_number(text: &str) -> Result<u64, std::num::ParseIntError> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(b"IDLE\0\0garbage"), "IDLE");
        assert_eq!(c_string(b"no terminator"), "no terminator");
        assert_eq!(c_string(b""), "");
        assert_eq!(c_string(&[0xff, b'a', 0]), "\u{fffd}a");
    }

    #[test]
    fn test_hex_and_numbers() {
        assert_eq!(hex32(0x500), "0x00000500");
        assert_eq!(parse_number("0x2000").unwrap(), 0x2000);
        assert_eq!(parse_number(" 42 ").unwrap(), 42);
        assert!(parse_number("0xnope").is_err());
    }
}
