//! Protocol codec
//!
//! Stateless conversion of primitive values to and from the line protocol.
//!
//! ## Value Encodings
//! - integers: variable-width uppercase hex, no prefix, no leading zeros
//! - booleans: `1` / `0`
//! - raw memory: "block encoding", 3 bytes → 4 chars
//!
//! ### Block Encoding
//! ```text
//!   byte0    byte1    byte2
//! ┌────────┬────────┬────────┐
//! │aaaaaabb│bbbbcccc│ccdddddd│   24-bit accumulator
//! └────────┴────────┴────────┘
//!      │       │        │
//!      ▼       ▼        ▼
//!  32+a   32+b   32+c   32+d     each char in [32, 96)
//! ```
//! A trailing partial group is zero-padded; the receiver knows the true
//! byte count from the size field sent alongside.

use bytes::BufMut;

use super::{SEPARATOR, TERMINATOR};
use crate::error::{RdbError, Result};

/// Chars produced per 3-byte group
pub const ENCODED_GROUP_LEN: usize = 4;

/// Offset added to every 6-bit value
const BLOCK_OFFSET: u8 = 32;

/// Maximum hex digits in a 32-bit value
const MAX_HEX_DIGITS: usize = 8;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

// =============================================================================
// Encoding
// =============================================================================

/// Write `value` as variable-width hex
pub fn put_hex<B: BufMut>(buf: &mut B, value: u32) {
    let mut digits = [0u8; MAX_HEX_DIGITS];
    let mut pos = MAX_HEX_DIGITS;
    let mut rest = value;
    loop {
        pos -= 1;
        digits[pos] = HEX_DIGITS[(rest & 0xF) as usize];
        rest >>= 4;
        if rest == 0 {
            break;
        }
    }
    buf.put_slice(&digits[pos..]);
}

pub fn put_str<B: BufMut>(buf: &mut B, text: &str) {
    buf.put_slice(text.as_bytes());
}

pub fn put_char<B: BufMut>(buf: &mut B, c: u8) {
    buf.put_u8(c);
}

pub fn put_bool<B: BufMut>(buf: &mut B, value: bool) {
    buf.put_u8(if value { b'1' } else { b'0' });
}

pub fn put_sep<B: BufMut>(buf: &mut B) {
    buf.put_u8(SEPARATOR);
}

pub fn put_term<B: BufMut>(buf: &mut B) {
    buf.put_u8(TERMINATOR);
}

/// Encode the low 24 bits of `accum` as 4 block chars
pub fn encode_word<B: BufMut>(buf: &mut B, accum: u32) {
    for shift in [18u32, 12, 6, 0] {
        buf.put_u8(BLOCK_OFFSET + ((accum >> shift) & 0x3F) as u8);
    }
}

/// Block-encode `data`, 3 bytes per 4 output chars
pub fn encode_block<B: BufMut>(buf: &mut B, data: &[u8]) {
    for group in data.chunks(3) {
        let mut accum = 0u32;
        for i in 0..3 {
            accum <<= 8;
            if let Some(&byte) = group.get(i) {
                accum |= byte as u32;
            }
        }
        encode_word(buf, accum);
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Convert one hex char to its 0-15 value
pub fn parse_hex_char(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(10 + c - b'a'),
        b'A'..=b'F' => Some(10 + c - b'A'),
        _ => None,
    }
}

/// Parse two hex chars into a byte
pub fn parse_hex_byte(hi: u8, lo: u8) -> Option<u8> {
    Some((parse_hex_char(hi)? << 4) | parse_hex_char(lo)?)
}

/// Strictly parse a 1-8 digit hex value.
///
/// Any char outside `[0-9a-fA-F]`, an empty string, or more than 8 digits
/// is a failure; there is no partial result.
pub fn parse_hex32(text: &str) -> Result<u32> {
    let bytes = text.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_HEX_DIGITS {
        return Err(RdbError::InvalidHex(text.to_string()));
    }

    let mut acc = 0u32;
    for &c in bytes {
        let nibble = parse_hex_char(c).ok_or_else(|| RdbError::InvalidHex(text.to_string()))?;
        acc = (acc << 4) | nibble as u32;
    }
    Ok(acc)
}

/// Decode `size` bytes from block-encoded chars.
///
/// Requires `ceil(size / 3) * 4` chars, each within `[32, 96)`. Padding in
/// the last group is discarded.
pub fn decode_block(encoded: &[u8], size: usize) -> Result<Vec<u8>> {
    let groups = (size + 2) / 3;
    let needed = groups * ENCODED_GROUP_LEN;
    if encoded.len() < needed {
        return Err(RdbError::MalformedFrame(format!(
            "block data too short: expected {} chars, got {}",
            needed,
            encoded.len()
        )));
    }

    let mut out = Vec::with_capacity(size);
    for chunk in encoded[..needed].chunks(ENCODED_GROUP_LEN) {
        let accum = decode_group(chunk)?;
        for shift in [16u32, 8, 0] {
            if out.len() == size {
                break;
            }
            out.push((accum >> shift) as u8);
        }
    }
    Ok(out)
}

/// Decode 4 block chars into a 24-bit accumulator
fn decode_group(chunk: &[u8]) -> Result<u32> {
    let mut accum = 0u32;
    for &c in chunk {
        if !(BLOCK_OFFSET..BLOCK_OFFSET + 64).contains(&c) {
            return Err(RdbError::MalformedFrame(format!(
                "block char 0x{:02x} out of range",
                c
            )));
        }
        accum = (accum << 6) | (c - BLOCK_OFFSET) as u32;
    }
    Ok(accum)
}

// =============================================================================
// Field Splitting
// =============================================================================

/// Walks the separator-delimited fields of one frame.
///
/// Fields past the end read as empty, so list parsers stop on an empty field.
#[derive(Debug, Clone)]
pub struct FieldSplitter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldSplitter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next raw field, without the separator
    pub fn next_field(&mut self) -> &'a [u8] {
        let remaining = &self.data[self.pos..];
        match remaining.iter().position(|&b| b == SEPARATOR) {
            Some(end) => {
                self.pos += end + 1;
                &remaining[..end]
            }
            None => {
                self.pos = self.data.len();
                remaining
            }
        }
    }

    /// Next field as text
    pub fn next_str(&mut self) -> String {
        String::from_utf8_lossy(self.next_field()).into_owned()
    }

    /// Next field as a strict hex value
    pub fn next_hex(&mut self) -> Result<u32> {
        let field = self.next_field();
        match std::str::from_utf8(field) {
            Ok(text) => parse_hex32(text),
            Err(_) => Err(RdbError::InvalidHex(String::from_utf8_lossy(field).into_owned())),
        }
    }

    /// Everything not yet consumed
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }
}
