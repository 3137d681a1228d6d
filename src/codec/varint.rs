//! Unsigned 32-bit varint codec
//!
//! Little-endian 7-bit groups; the high bit of each byte signals that more
//! bytes follow. A 32-bit value never needs more than five groups, so the
//! decoder treats a missing terminator within five bytes as corruption.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Maximum encoded length of a 32-bit varint.
pub const MAX_LEN: usize = 5;

/// Decode failure for a length field.
#[derive(Debug, Error)]
pub enum VarintError {
    /// No terminating byte within five 7-bit groups.
    #[error("varint exceeds the 32-bit group limit")]
    Overflow,
    /// The underlying stream failed (EOF mid-varint included).
    #[error("i/o while decoding varint")]
    Io(#[from] io::Error),
}

/// Number of bytes `value` occupies when encoded (1..=5).
pub fn encoded_len(value: u32) -> usize {
    let mut v = value;
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Write `value` out 7 bits at a time. Returns the number of bytes written.
pub fn write_u32(w: &mut impl Write, value: u32) -> io::Result<usize> {
    let mut v = value;
    let mut written = 0;
    while v >= 0x80 {
        w.write_all(&[(v as u8) | 0x80])?;
        v >>= 7;
        written += 1;
    }
    w.write_all(&[v as u8])?;
    Ok(written + 1)
}

/// Read a varint, returning the value and the number of bytes consumed.
pub fn read_u32(r: &mut impl Read) -> Result<(u32, usize), VarintError> {
    let mut value = 0u32;
    let mut shift = 0u32;
    let mut consumed = 0usize;
    loop {
        if shift >= 35 {
            return Err(VarintError::Overflow);
        }
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        consumed += 1;
        value |= u32::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok((value, consumed));
        }
        shift += 7;
    }
}
