//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers used for frame dumps in logs and for parsing cipher keys given
//! on the command line.
//!
//! ## Usage
//!
//! ```rust
//! use subghz_link::util::hex::{decode_hex, encode_hex, format_hex_compact};
//!
//! let data = [0xA5, 0x5A, 0x09, 0x00];
//! assert_eq!(encode_hex(&data), "a55a0900");
//! assert_eq!(decode_hex("a5 5a 09 00").unwrap(), data);
//! assert_eq!(format_hex_compact(&data), "a5 5a 09 00");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "a5 5a 09 00" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
