//! The wire string encoding.
//!
//! Each UTF-16 code unit is written UTF-8-style on the unit itself: one byte
//! below 0x80, two below 0x800, three otherwise. The encoder is deliberately
//! not surrogate-aware, so a character above the Basic Multilingual Plane
//! becomes two 3-byte surrogate encodings (6 bytes total). Both sides of the
//! wire agree on this, and it must be preserved exactly for compatibility.

use super::error::CodecError;

/// Byte length of `s` under the wire string encoding.
pub(crate) fn encoded_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|unit| {
            if unit < 0x80 {
                1
            } else if unit < 0x800 {
                2
            } else {
                3
            }
        })
        .sum()
}

pub(crate) fn encode_into(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        if unit < 0x80 {
            out.push(unit as u8);
        } else if unit < 0x800 {
            out.push(0xC0 | (unit >> 6) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        } else {
            out.push(0xE0 | (unit >> 12) as u8);
            out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
    }
}

/// Decodes `bytes` back into a string. `base_offset` is only used to report
/// a useful position in errors.
pub(crate) fn decode(bytes: &[u8], base_offset: usize) -> Result<String, CodecError> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let unit = if b < 0x80 {
            i += 1;
            u16::from(b)
        } else if b & 0xE0 == 0xC0 {
            let lo = continuation(bytes, i + 1, base_offset)?;
            i += 2;
            (u16::from(b & 0x1F) << 6) | u16::from(lo)
        } else if b & 0xF0 == 0xE0 {
            let mid = continuation(bytes, i + 1, base_offset)?;
            let lo = continuation(bytes, i + 2, base_offset)?;
            i += 3;
            (u16::from(b & 0x0F) << 12) | (u16::from(mid) << 6) | u16::from(lo)
        } else {
            return Err(CodecError::BadStringData {
                offset: base_offset + i,
            });
        };
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|_| CodecError::BadStringData {
        offset: base_offset,
    })
}

fn continuation(bytes: &[u8], i: usize, base_offset: usize) -> Result<u8, CodecError> {
    match bytes.get(i) {
        Some(b) if b & 0xC0 == 0x80 => Ok(b & 0x3F),
        _ => Err(CodecError::BadStringData {
            offset: base_offset + i,
        }),
    }
}
