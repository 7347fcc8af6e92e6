//! Acknowledged messaging: correlated request/response framing over the
//! packet codec, plus the per-peer pending-response bookkeeping.

mod envelope;
mod error;
mod pending;
mod responder;

pub use envelope::{Body, Envelope, MessageId, FLAG_ERROR, FLAG_PACKET_PAYLOAD, FLAG_RESPONSE};
pub use error::MessageError;
pub use pending::{
    PendingResponses, Reply, ReplyResult, ResponseCallback, RESPONSE_WARN_INTERVAL,
};
pub use responder::Responder;
