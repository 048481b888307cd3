/// Utility functions for hex formatting, dumps and durations
use std::fmt::Write;
use time::{format_description, OffsetDateTime};

use crate::error::{CgmError, CgmResult};

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Lower-case hex string without separators
pub fn hex(data: &[u8]) -> String {
    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

/// Parse a hex string, ignoring spaces, colons and a leading `0x`
pub fn parse_hex(text: &str) -> CgmResult<Vec<u8>> {
    let digits: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CgmError::InvalidData(format!("odd hex length: {}", text)));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| CgmError::InvalidData(format!("{}: {}", text, e)))
        })
        .collect()
}

/// Colon-separated upper-case hex, as used for MAC addresses
pub fn hex_address(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Multi-line dump of 8-byte blocks, each prefixed by its block number
///
/// # Arguments
/// * `data` - Bytes to dump
/// * `header` - First line of the dump
/// * `start_block` - Number printed in front of the first block
pub fn hex_dump(data: &[u8], header: &str, start_block: usize) -> String {
    let mut dump = String::from(header);
    for (i, block) in data.chunks(8).enumerate() {
        let bytes = block
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = write!(dump, "\n{:04X}  {}", start_block + i, bytes);
    }
    dump
}

/// Render a minute count as days, hours and minutes
pub fn formatted_interval(minutes: i32) -> String {
    let days = minutes / 1440;
    let hours = minutes % 1440 / 60;
    let mins = minutes % 60;
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{} day{}", days, if days == 1 { "" } else { "s" }));
    }
    if hours > 0 {
        parts.push(format!("{} hour{}", hours, if hours == 1 { "" } else { "s" }));
    }
    if mins > 0 || parts.is_empty() {
        parts.push(format!("{} minute{}", mins, if mins == 1 { "" } else { "s" }));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_with_separators() {
        assert_eq!(parse_hex("0x9D 08:30").unwrap(), vec![0x9D, 0x08, 0x30]);
        assert_eq!(hex(&[0x9D, 0x08, 0x30]), "9d0830");
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn dumps_blocks() {
        let dump = hex_dump(&[0u8; 10], "FRAM:", 0x28);
        assert_eq!(
            dump,
            "FRAM:\n0028  00 00 00 00 00 00 00 00\n0029  00 00"
        );
    }

    #[test]
    fn formats_intervals() {
        assert_eq!(formatted_interval(20160), "14 days");
        assert_eq!(formatted_interval(61), "1 hour 1 minute");
        assert_eq!(formatted_interval(0), "0 minutes");
    }

    #[test]
    fn formats_mac_addresses() {
        assert_eq!(hex_address(&[0xE0, 0x07, 0xA4]), "E0:07:A4");
    }
}
