use thiserror::Error;

use crate::packet::CodecError;

/// Errors from schema registration and the per-field value codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A field name may only be registered once
    #[error("Field '{name}' registered more than once")]
    DuplicateField { name: String },

    /// Lookup by a name the registry does not know
    #[error("Unknown field '{name}'")]
    UnknownField { name: String },

    /// Lookup by a wire id the registry does not know
    #[error("Unknown field id {id}")]
    UnknownFieldId { id: u16 },

    /// A value does not fit the field's declared encoding kind
    #[error("Field '{field}' expects a {expected} value")]
    WrongValueType {
        field: String,
        expected: &'static str,
    },

    /// A schema descriptor could not be interpreted
    #[error("Malformed schema descriptor: {reason}")]
    BadDescriptor { reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}
