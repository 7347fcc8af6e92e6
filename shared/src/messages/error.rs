use thiserror::Error;

use crate::packet::CodecError;

/// Errors surfaced by the acknowledged messaging layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The envelope could not be decoded
    #[error("Malformed message envelope: {0}")]
    Codec(#[from] CodecError),

    /// A numbered response arrived with no matching pending entry
    #[error("Response id {id} has no pending request")]
    UnknownResponse { id: u32 },

    /// The far end reported an error instead of a payload
    #[error("Remote error: {0}")]
    Remote(String),

    /// Sentinel used to fail every pending request when the peer disconnects
    #[error("Peer disconnected")]
    Disconnected,
}
