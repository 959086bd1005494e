//! Conversions between raw attribute values and their textual forms.
//!
//! Formatting never fails. Parsing user input returns [`ErrorKind::MalformedInput`] with a message naming the
//! offending token so the caller can point the user at it.

use crate::error::ErrorKind;
use crate::{Error, Result};

/// Textual representation of an attribute value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataFormat {
    /// Uppercase, space separated pairs: `"0A FF"`
    #[default]
    Hex,
    /// Printable ASCII with `.` for anything else
    Ascii,
    /// Space separated unsigned octets: `"10 255"`
    Decimal,
    /// Space separated, zero padded 8-bit groups: `"00001010"`
    Binary,
}

/// Formats `bytes` in the given representation.
pub fn format(bytes: &[u8], format: DataFormat) -> String {
    match format {
        DataFormat::Hex => bytes_to_hex(bytes),
        DataFormat::Ascii => bytes_to_ascii(bytes),
        DataFormat::Decimal => bytes_to_decimal(bytes),
        DataFormat::Binary => bytes_to_binary(bytes),
    }
}

/// Parses user input in the given representation.
pub fn parse(text: &str, format: DataFormat) -> Result<Vec<u8>> {
    match format {
        DataFormat::Hex => hex_to_bytes(text),
        DataFormat::Ascii => ascii_to_bytes(text),
        DataFormat::Decimal => decimal_to_bytes(text),
        DataFormat::Binary => binary_to_bytes(text),
    }
}

fn malformed(message: String) -> Error {
    Error::with_message(ErrorKind::MalformedInput, message)
}

fn join<T: std::fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|x| x.to_string()).collect::<Vec<_>>().join(" ")
}

/// `[0x0A, 0xFF]` → `"0A FF"`
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    join(bytes.iter().map(|b| format!("{b:02X}")))
}

/// Parses hex digits, ignoring whitespace and `0x` prefixes.
///
/// `"01 a0"`, `"01A0"` and `"0x01 0xA0"` all yield `[0x01, 0xA0]`.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    let digits: String = hex
        .split_whitespace()
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .collect();
    if digits.len() % 2 != 0 {
        return Err(malformed(format!("odd number of hex digits in {hex:?}")));
    }
    if let Some(c) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(malformed(format!("{c:?} is not a hex digit")));
    }
    // all ascii from here on, so byte offsets are char offsets
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| malformed(format!("invalid hex pair {:?}", &digits[i..i + 2])))
        })
        .collect()
}

/// Printable ASCII is kept, every other octet becomes `.`.
pub fn bytes_to_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
        .collect()
}

/// Encodes `text` as ASCII; any non-ASCII character is rejected.
pub fn ascii_to_bytes(text: &str) -> Result<Vec<u8>> {
    match text.chars().find(|c| !c.is_ascii()) {
        Some(c) => Err(malformed(format!("{c:?} is not an ASCII character"))),
        None => Ok(text.as_bytes().to_vec()),
    }
}

/// `[10, 255]` → `"10 255"`
pub fn bytes_to_decimal(bytes: &[u8]) -> String {
    join(bytes.iter())
}

/// Parses whitespace or comma separated decimal octets in `0..=255`.
pub fn decimal_to_bytes(text: &str) -> Result<Vec<u8>> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            let digits = token.bytes().all(|b| b.is_ascii_digit());
            digits
                .then(|| token.parse::<u8>().ok())
                .flatten()
                .ok_or_else(|| malformed(format!("{token:?} is not a number between 0 and 255")))
        })
        .collect()
}

/// `[5]` → `"00000101"`
pub fn bytes_to_binary(bytes: &[u8]) -> String {
    join(bytes.iter().map(|b| format!("{b:08b}")))
}

/// Parses whitespace separated groups of one to eight binary digits.
pub fn binary_to_bytes(text: &str) -> Result<Vec<u8>> {
    text.split_whitespace()
        .map(|token| {
            if token.len() > 8 {
                return Err(malformed(format!("{token:?} has more than 8 bits")));
            }
            if !token.bytes().all(|b| b == b'0' || b == b'1') {
                return Err(malformed(format!("{token:?} is not a binary octet")));
            }
            u8::from_str_radix(token, 2).map_err(|_| malformed(format!("{token:?} is not a binary octet")))
        })
        .collect()
}

/// Reads up to eight octets as a little endian unsigned integer.
pub fn bytes_to_uint_le(bytes: &[u8]) -> Result<u64> {
    check_width(bytes.len())?;
    Ok(bytes
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | (u64::from(b) << (8 * i))))
}

/// Reads up to eight octets as a big endian unsigned integer.
pub fn bytes_to_uint_be(bytes: &[u8]) -> Result<u64> {
    check_width(bytes.len())?;
    Ok(bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Writes the low `size` octets of `value` in little endian order.
pub fn uint_to_bytes_le(value: u64, size: usize) -> Result<Vec<u8>> {
    check_width(size)?;
    Ok(value.to_le_bytes()[..size].to_vec())
}

/// Writes the low `size` octets of `value` in big endian order.
pub fn uint_to_bytes_be(value: u64, size: usize) -> Result<Vec<u8>> {
    check_width(size)?;
    Ok(value.to_be_bytes()[8 - size..].to_vec())
}

fn check_width(size: usize) -> Result<()> {
    if size > 8 {
        Err(malformed(format!("{size} octets do not fit in a 64-bit integer")))
    } else {
        Ok(())
    }
}
