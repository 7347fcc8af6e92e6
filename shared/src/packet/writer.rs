use serde_json::Value;

use super::error::CodecError;
use super::pool::{PacketPool, PooledBuffer};
use super::varint::{
    size_int, SINGLE_BYTE_LIMIT, TAG_NEG_BYTE, TAG_NEG_U16, TAG_NEG_U32, TAG_NEG_U64, TAG_POS_U16,
    TAG_POS_U32, TAG_POS_U64,
};
use super::{strings, Packet};
use super::{
    FLAG_DEBUG, TYPE_ANSI, TYPE_BOOL, TYPE_BUFFER, TYPE_FLOAT, TYPE_INT, TYPE_JSON, TYPE_PACKET,
    TYPE_STR,
};

/// JSON prefix byte: the value follows as a length-prefixed string.
pub(crate) const JSON_INLINE: u8 = 6;
/// Falsy table indexed by the JSON prefix byte, below [`JSON_INLINE`]:
/// undefined, null, 0, false, "", NaN.
pub(crate) const JSON_FALSY_NULL: u8 = 1;
pub(crate) const JSON_FALSY_ZERO: u8 = 2;
pub(crate) const JSON_FALSY_FALSE: u8 = 3;
pub(crate) const JSON_FALSY_EMPTY_STR: u8 = 4;

/// Append-only packet builder drawing backing buffers from a [`PacketPool`].
///
/// When a write outgrows the current buffer, the buffer is flushed to a
/// segment list and a larger one is drawn; [`finish`](Self::finish) coalesces
/// everything into one contiguous frozen [`Packet`].
pub struct PacketWriter {
    pool: PacketPool,
    segments: Vec<PooledBuffer>,
    current: PooledBuffer,
    flushed_len: usize,
    flags: u8,
}

impl PacketWriter {
    pub fn new(pool: &PacketPool) -> Self {
        Self {
            pool: pool.clone(),
            segments: Vec::new(),
            current: pool.acquire(64),
            flushed_len: 0,
            flags: 0,
        }
    }

    /// A writer in verbose wire mode: every value carries a type tag byte.
    pub fn new_debug(pool: &PacketPool) -> Self {
        let mut writer = Self::new(pool);
        writer.flags = FLAG_DEBUG;
        writer
    }

    pub fn new_with_mode(pool: &PacketPool, debug: bool) -> Self {
        if debug {
            Self::new_debug(pool)
        } else {
            Self::new(pool)
        }
    }

    pub fn is_debug(&self) -> bool {
        self.flags & FLAG_DEBUG != 0
    }

    /// Sets additional bits in the packet's flag byte.
    pub fn set_flag(&mut self, bit: u8) {
        self.flags |= bit;
    }

    /// Bytes written so far, excluding the flag byte.
    pub fn len(&self) -> usize {
        self.flushed_len + self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Growth: flush the current buffer as a segment and draw a bigger one.
    fn ensure(&mut self, needed: usize) {
        if self.current.remaining() >= needed {
            return;
        }
        let grown = (self.current.capacity() * 2).max(needed);
        let next = self.pool.acquire(grown);
        let prev = std::mem::replace(&mut self.current, next);
        self.flushed_len += prev.len();
        self.segments.push(prev);
    }

    fn push_byte(&mut self, byte: u8) {
        self.ensure(1);
        self.current.push(byte);
    }

    fn push_slice(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.current.extend_from_slice(bytes);
    }

    fn push_tag(&mut self, tag: u8) {
        if self.is_debug() {
            self.push_byte(tag);
        }
    }

    // Untagged packed integer, shared by length prefixes and write_int.
    fn push_int(&mut self, v: i64) {
        self.ensure(size_int(v));
        if (0..SINGLE_BYTE_LIMIT).contains(&v) {
            self.current.push(v as u8);
            return;
        }
        if (-255..0).contains(&v) {
            self.current.push(TAG_NEG_BYTE);
            self.current.push(-v as u8);
            return;
        }
        let negative = v < 0;
        let magnitude = v.unsigned_abs();
        if magnitude <= u64::from(u16::MAX) {
            self.current
                .push(if negative { TAG_NEG_U16 } else { TAG_POS_U16 });
            self.current
                .extend_from_slice(&(magnitude as u16).to_le_bytes());
        } else if magnitude <= u64::from(u32::MAX) {
            self.current
                .push(if negative { TAG_NEG_U32 } else { TAG_POS_U32 });
            self.current
                .extend_from_slice(&(magnitude as u32).to_le_bytes());
        } else {
            self.current
                .push(if negative { TAG_NEG_U64 } else { TAG_POS_U64 });
            self.current.extend_from_slice(&magnitude.to_le_bytes());
        }
    }

    pub fn write_int(&mut self, v: i64) {
        self.push_tag(TYPE_INT);
        self.push_int(v);
    }

    pub fn write_uint(&mut self, v: u64) -> Result<(), CodecError> {
        let v = i64::try_from(v).map_err(|_| CodecError::IntOutOfRange { magnitude: v })?;
        self.write_int(v);
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) {
        self.push_tag(TYPE_BOOL);
        self.push_byte(u8::from(v));
    }

    pub fn write_f64(&mut self, v: f64) {
        self.push_tag(TYPE_FLOAT);
        self.push_slice(&v.to_le_bytes());
    }

    /// Length-prefixed string in the wire encoding (see [`super::strings`]).
    pub fn write_str(&mut self, s: &str) {
        self.push_tag(TYPE_STR);
        let len = strings::encoded_len(s);
        self.push_int(len as i64);
        self.ensure(len);
        strings::encode_into(s, &mut self.current);
    }

    /// Fast path for identifiers whose character codes all fit one byte.
    pub fn write_ansi_str(&mut self, s: &str) {
        debug_assert!(s.chars().all(|c| (c as u32) < 0x100));
        self.push_tag(TYPE_ANSI);
        // one wire byte per char, not per UTF-8 byte
        let len = s.chars().count();
        self.push_int(len as i64);
        self.ensure(len);
        for c in s.chars() {
            self.current.push(c as u8);
        }
    }

    /// JSON value: a one-byte falsy index, or [`JSON_INLINE`] plus the
    /// serialized value as a length-prefixed string.
    pub fn write_json(&mut self, v: &Value) {
        self.push_tag(TYPE_JSON);
        match v {
            Value::Null => self.push_byte(JSON_FALSY_NULL),
            Value::Number(n) if n.as_i64() == Some(0) => self.push_byte(JSON_FALSY_ZERO),
            Value::Bool(false) => self.push_byte(JSON_FALSY_FALSE),
            Value::String(s) if s.is_empty() => self.push_byte(JSON_FALSY_EMPTY_STR),
            other => {
                self.push_byte(JSON_INLINE);
                let serialized = other.to_string();
                let len = strings::encoded_len(&serialized);
                self.push_int(len as i64);
                self.ensure(len);
                strings::encode_into(&serialized, &mut self.current);
            }
        }
    }

    /// Opaque byte blob, length-prefixed.
    pub fn write_buffer(&mut self, bytes: &[u8]) {
        self.push_tag(TYPE_BUFFER);
        self.push_int(bytes.len() as i64);
        self.push_slice(bytes);
    }

    /// Embeds another packet, flag byte included, as a length-prefixed blob.
    pub fn write_packet(&mut self, packet: &Packet) {
        self.push_tag(TYPE_PACKET);
        let bytes = packet.bytes();
        self.push_int(bytes.len() as i64);
        self.push_slice(bytes);
    }

    /// Appends pre-encoded body bytes verbatim. The fragment must have been
    /// produced by a writer in the same wire mode.
    pub fn append_raw(&mut self, bytes: &[u8]) {
        self.push_slice(bytes);
    }

    /// Coalesces all segments into one contiguous frozen [`Packet`].
    pub fn finish(self) -> Packet {
        let total = 1 + self.flushed_len + self.current.len();
        let mut out = self.pool.acquire(total);
        out.push(self.flags);
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out.extend_from_slice(&self.current);
        Packet::from_pooled(out)
    }

    /// Coalesces into raw body bytes without a flag byte, for fragments that
    /// will be appended into other packets via [`append_raw`](Self::append_raw).
    pub fn finish_body(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.flushed_len + self.current.len());
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out.extend_from_slice(&self.current);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::PacketPool;
    use super::PacketWriter;

    #[test]
    fn growth_flushes_segments_and_finish_coalesces() {
        let pool = PacketPool::new();
        let mut writer = PacketWriter::new(&pool);
        let blob = vec![7u8; 1000];
        writer.write_buffer(&blob);
        writer.write_buffer(&blob);
        let packet = writer.finish();

        let mut reader = packet.reader();
        assert_eq!(reader.read_buffer().unwrap(), blob);
        assert_eq!(reader.read_buffer().unwrap(), blob);
        assert!(reader.is_empty());
    }

    #[test]
    fn finish_body_has_no_flag_byte() {
        let pool = PacketPool::new();
        let mut writer = PacketWriter::new(&pool);
        writer.write_int(5);
        let body = writer.finish_body();
        assert_eq!(body, vec![5u8]);
    }
}
