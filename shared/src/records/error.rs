use thiserror::Error;

use crate::packet::CodecError;
use crate::schema::SchemaError;

/// Errors while encoding or decoding tagged record streams
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A record tag outside the update-body vocabulary
    #[error("Unknown update record tag {tag}")]
    UnknownRecordTag { tag: i64 },

    /// A sub-collection operation tag outside the diff vocabulary
    #[error("Unknown sub-collection op tag {tag}")]
    UnknownSubOpTag { tag: i64 },

    /// A scalar diff entry was found for a collection field, or vice versa
    #[error("Field '{field}' diff entry does not match its collection kind")]
    CollectionMismatch { field: String },
}
