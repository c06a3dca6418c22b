//! # Hex Encoding/Decoding Utilities
//!
//! Payload hex helpers shared by the RN2903 wire protocol (`radio tx <hex>`,
//! `radio_rx <hex>`) and the event sink, which records every frame both as
//! raw bytes and as a hex string.
//!
//! ## Usage
//!
//! ```rust
//! use loralink_rs::util::hex::{decode_hex, encode_hex};
//!
//! let payload = b"HI";
//! assert_eq!(encode_hex(payload), "4849");
//! assert_eq!(decode_hex("4849").unwrap(), payload);
//! // Modem output may be upper, lower or mixed case.
//! assert_eq!(decode_hex("4a4B").unwrap(), vec![0x4A, 0x4B]);
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("empty hex string")]
    EmptyString,

    #[error("hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex, the form the RN2903 accepts for
/// `radio tx` and the form the event sink records.
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode a hex string to bytes.
///
/// Accepts uppercase, lowercase and mixed-case input; requires an even
/// number of characters and at least one byte.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    if hex_str.is_empty() {
        return Err(HexError::EmptyString);
    }

    if hex_str.len() % 2 != 0 {
        return Err(HexError::OddLength(hex_str.len()));
    }

    hex::decode(hex_str).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format data as "48 49 21" with spaces between bytes, for log lines.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let data = vec![0x00, 0x48, 0x49, 0xAB, 0xFF];
        let encoded = encode_hex(&data);
        assert_eq!(decode_hex(&encoded).unwrap(), data);
    }

    #[test]
    fn test_decode_case_insensitive() {
        let expected = vec![0xAB, 0xCD, 0xEF];
        assert_eq!(decode_hex("abcdef").unwrap(), expected);
        assert_eq!(decode_hex("ABCDEF").unwrap(), expected);
        assert_eq!(decode_hex("AbCdEf").unwrap(), expected);
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_hex_compact(&[0x48, 0x49, 0x21]), "48 49 21");
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("484"), Err(HexError::OddLength(3)));
        assert!(matches!(decode_hex("4G"), Err(HexError::DecodeError(_))));
    }
}
