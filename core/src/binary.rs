//! Hexadecimal display helpers for raw byte strings.

use snafu::{ensure, Snafu};

#[derive(Debug, Clone, Eq, PartialEq, Snafu)]
pub enum ParseHexError {
    #[snafu(display("invalid hexadecimal digit in `{}`", text))]
    InvalidDigit { text: String },
}

/// Render bytes as `0x…`, lower-case, two digits per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Parse a hexadecimal string into bytes.
///
/// Accepts an optional `0x` prefix and whitespace between digit groups;
/// an odd number of digits gets an implicit leading zero.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, ParseHexError> {
    let digits: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    ensure!(
        digits.chars().all(|c| c.is_ascii_hexdigit()),
        InvalidDigitSnafu { text }
    );

    let padded = if digits.len() % 2 == 0 {
        digits
    } else {
        format!("0{}", digits)
    };
    let out = padded
        .as_bytes()
        .chunks(2)
        .map(|pair| (hex_digit(pair[0]) << 4) | hex_digit(pair[1]))
        .collect();
    Ok(out)
}

fn hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}
