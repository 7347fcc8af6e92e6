//! Field schema: the process-wide table mapping field names to wire ids,
//! encodings, sub-collection kinds, defaults and visibility flags.

mod error;
mod field;
mod registry;
mod value;

pub use error::SchemaError;
pub use field::{CollectionKind, EncodingKind, FieldDef, FieldSpec};
pub use registry::{SchemaRegistry, FIELD_RESET_MARKER, FIELD_STREAM_END, FIRST_FIELD_ID};
pub use value::{read_value, write_value};
