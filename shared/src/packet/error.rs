use thiserror::Error;

/// Errors that can occur while encoding or decoding a Packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Attempted to read past the end of the packet
    #[error("Read of {needed} bytes past end of packet ({remaining} remaining)")]
    Underrun { needed: usize, remaining: usize },

    /// Encountered a packed-integer tag byte that is not part of the encoding
    #[error("Unknown packed-integer tag byte {tag}")]
    UnknownIntTag { tag: u8 },

    /// A decoded unsigned 64-bit magnitude does not fit the integer range
    #[error("Packed integer magnitude {magnitude} out of range")]
    IntOutOfRange { magnitude: u64 },

    /// Encountered a JSON prefix byte that is not a falsy index or the inline tag
    #[error("Unknown JSON prefix byte {tag}")]
    UnknownJsonTag { tag: u8 },

    /// The wire string data could not be reassembled into a valid string
    #[error("Malformed string data at offset {offset}")]
    BadStringData { offset: usize },

    /// Embedded JSON string failed to parse
    #[error("Malformed embedded JSON: {reason}")]
    BadJsonData { reason: String },

    /// Debug wire mode: the value's type tag did not match the requested read
    #[error("Debug type tag mismatch: expected {expected}, found {found}")]
    TypeTagMismatch { expected: u8, found: u8 },
}
