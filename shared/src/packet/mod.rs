//! Wire packet codec: framing, packed integers, strings, JSON and pooled
//! backing buffers.
//!
//! A packet spends its life in two phases. While being written it is
//! append-only and may span several flushed segments; [`PacketWriter::finish`]
//! coalesces those into one contiguous read-only [`Packet`], after which the
//! bytes can only be read through a [`PacketReader`] cursor. The phase change
//! is expressed as a type change, so the "frozen after make-readable"
//! invariant holds by construction.

mod error;
mod pool;
mod reader;
mod strings;
mod varint;
mod writer;

pub use error::CodecError;
pub use pool::{PacketPool, PooledBuffer};
pub use reader::PacketReader;
pub use varint::size_int;
pub use writer::PacketWriter;

/// Flag byte bit 0: verbose wire mode. Every value is preceded by a one-byte
/// type tag, a purely diagnostic superset of the compact format.
pub const FLAG_DEBUG: u8 = 0x01;

// Debug-mode type tags.
pub(crate) const TYPE_INT: u8 = 1;
pub(crate) const TYPE_STR: u8 = 2;
pub(crate) const TYPE_JSON: u8 = 3;
pub(crate) const TYPE_BOOL: u8 = 4;
pub(crate) const TYPE_FLOAT: u8 = 5;
pub(crate) const TYPE_BUFFER: u8 = 6;
pub(crate) const TYPE_PACKET: u8 = 7;
pub(crate) const TYPE_ANSI: u8 = 8;

/// A frozen, contiguous wire packet: one leading flag byte, then the body.
///
/// Cheap to share behind an `Rc` when several consumers need to read it; the
/// backing buffer returns to its pool bucket when the last owner drops it.
pub struct Packet {
    buf: PooledBuffer,
}

impl Packet {
    /// Wraps received network bytes into a packet, copying them into a pooled
    /// buffer. The input must at least contain the flag byte.
    pub fn from_bytes(pool: &PacketPool, bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Underrun {
                needed: 1,
                remaining: 0,
            });
        }
        let mut buf = pool.acquire(bytes.len());
        buf.extend_from_slice(bytes);
        Ok(Self { buf })
    }

    pub(crate) fn from_pooled(buf: PooledBuffer) -> Self {
        debug_assert!(!buf.is_empty());
        Self { buf }
    }

    /// The full wire image, flag byte included.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn flags(&self) -> u8 {
        self.buf[0]
    }

    pub fn is_debug(&self) -> bool {
        self.flags() & FLAG_DEBUG != 0
    }

    /// Body length, excluding the flag byte.
    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a read cursor at the beginning of the body.
    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(&self.buf[1..], self.is_debug())
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("flags", &self.flags())
            .field("len", &self.len())
            .finish()
    }
}
