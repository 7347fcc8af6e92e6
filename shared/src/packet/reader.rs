use serde_json::Value;

use super::error::CodecError;
use super::pool::PacketPool;
use super::varint::{
    SINGLE_BYTE_LIMIT, TAG_NEG_BYTE, TAG_NEG_U16, TAG_NEG_U32, TAG_NEG_U64, TAG_POS_U16,
    TAG_POS_U32, TAG_POS_U64,
};
use super::writer::{
    JSON_FALSY_EMPTY_STR, JSON_FALSY_FALSE, JSON_FALSY_NULL, JSON_FALSY_ZERO, JSON_INLINE,
};
use super::{strings, Packet};
use super::{
    TYPE_ANSI, TYPE_BOOL, TYPE_BUFFER, TYPE_FLOAT, TYPE_INT, TYPE_JSON, TYPE_PACKET, TYPE_STR,
};

/// Borrowing read cursor over a frozen [`Packet`] body.
///
/// Every read is bounds-checked; running past the end is a [`CodecError`],
/// never a silent truncation.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    offset: usize,
    debug: bool,
}

impl<'a> PacketReader<'a> {
    pub(crate) fn new(buf: &'a [u8], debug: bool) -> Self {
        Self {
            buf,
            offset: 0,
            debug,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Underrun {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn take_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn expect_tag(&mut self, expected: u8) -> Result<(), CodecError> {
        if !self.debug {
            return Ok(());
        }
        let found = self.take_byte()?;
        if found != expected {
            return Err(CodecError::TypeTagMismatch { expected, found });
        }
        Ok(())
    }

    // Untagged packed integer, shared by length prefixes and read_int.
    fn pull_int(&mut self) -> Result<i64, CodecError> {
        let first = self.take_byte()?;
        if i64::from(first) < SINGLE_BYTE_LIMIT {
            return Ok(i64::from(first));
        }
        match first {
            TAG_NEG_BYTE => Ok(-i64::from(self.take_byte()?)),
            TAG_POS_U16 => {
                let bytes = self.take(2)?;
                Ok(i64::from(u16::from_le_bytes([bytes[0], bytes[1]])))
            }
            TAG_NEG_U16 => {
                let bytes = self.take(2)?;
                Ok(-i64::from(u16::from_le_bytes([bytes[0], bytes[1]])))
            }
            TAG_POS_U32 => {
                let bytes = self.take(4)?;
                Ok(i64::from(u32::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            }
            TAG_NEG_U32 => {
                let bytes = self.take(4)?;
                Ok(-i64::from(u32::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            }
            TAG_POS_U64 => {
                let magnitude = self.pull_u64()?;
                i64::try_from(magnitude).map_err(|_| CodecError::IntOutOfRange { magnitude })
            }
            TAG_NEG_U64 => {
                let magnitude = self.pull_u64()?;
                if magnitude > i64::MAX as u64 + 1 {
                    return Err(CodecError::IntOutOfRange { magnitude });
                }
                Ok((magnitude as i64).wrapping_neg())
            }
            tag => Err(CodecError::UnknownIntTag { tag }),
        }
    }

    fn pull_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn pull_len(&mut self) -> Result<usize, CodecError> {
        let len = self.pull_int()?;
        usize::try_from(len).map_err(|_| CodecError::IntOutOfRange {
            magnitude: len.unsigned_abs(),
        })
    }

    pub fn read_int(&mut self) -> Result<i64, CodecError> {
        self.expect_tag(TYPE_INT)?;
        self.pull_int()
    }

    pub fn read_uint(&mut self) -> Result<u64, CodecError> {
        let v = self.read_int()?;
        u64::try_from(v).map_err(|_| CodecError::IntOutOfRange {
            magnitude: v.unsigned_abs(),
        })
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        self.expect_tag(TYPE_BOOL)?;
        Ok(self.take_byte()? != 0)
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.expect_tag(TYPE_FLOAT)?;
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn read_str(&mut self) -> Result<String, CodecError> {
        self.expect_tag(TYPE_STR)?;
        self.pull_str()
    }

    fn pull_str(&mut self) -> Result<String, CodecError> {
        let len = self.pull_len()?;
        let offset = self.offset;
        let bytes = self.take(len)?;
        strings::decode(bytes, offset)
    }

    pub fn read_ansi_str(&mut self) -> Result<String, CodecError> {
        self.expect_tag(TYPE_ANSI)?;
        let len = self.pull_len()?;
        let bytes = self.take(len)?;
        Ok(bytes.iter().map(|b| char::from(*b)).collect())
    }

    pub fn read_json(&mut self) -> Result<Value, CodecError> {
        self.expect_tag(TYPE_JSON)?;
        let prefix = self.take_byte()?;
        match prefix {
            // undefined, null and NaN all land on Null
            0 | JSON_FALSY_NULL | 5 => Ok(Value::Null),
            JSON_FALSY_ZERO => Ok(Value::from(0)),
            JSON_FALSY_FALSE => Ok(Value::Bool(false)),
            JSON_FALSY_EMPTY_STR => Ok(Value::String(String::new())),
            JSON_INLINE => {
                let serialized = self.pull_str()?;
                serde_json::from_str(&serialized).map_err(|e| CodecError::BadJsonData {
                    reason: e.to_string(),
                })
            }
            tag => Err(CodecError::UnknownJsonTag { tag }),
        }
    }

    pub fn read_buffer(&mut self) -> Result<Vec<u8>, CodecError> {
        self.expect_tag(TYPE_BUFFER)?;
        let len = self.pull_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads an embedded sub-packet back out into its own pooled buffer.
    pub fn read_packet(&mut self, pool: &PacketPool) -> Result<Packet, CodecError> {
        self.expect_tag(TYPE_PACKET)?;
        let len = self.pull_len()?;
        let bytes = self.take(len)?;
        Packet::from_bytes(pool, bytes)
    }
}
