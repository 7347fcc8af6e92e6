//! # Vantage Shared
//! Wire packet codec, acknowledged messaging and field schema shared between
//! vantage-server and vantage clients.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod messages;
pub mod packet;
pub mod records;
pub mod schema;

pub use messages::{
    Body, Envelope, MessageError, MessageId, PendingResponses, Reply, ReplyResult,
    Responder, ResponseCallback, FLAG_ERROR, FLAG_PACKET_PAYLOAD, FLAG_RESPONSE,
    RESPONSE_WARN_INTERVAL,
};
pub use packet::{size_int, CodecError, Packet, PacketPool, PacketReader, PacketWriter, FLAG_DEBUG};
pub use records::{
    read_actions, read_update, write_actions, write_delete, write_diff, write_event, write_full,
    write_initial_list, write_schema, write_terminate, ActionRequest, AssignmentOp, DiffChange,
    EntityView, RecordError, SubOp, UpdateRecord,
};
pub use schema::{
    read_value, write_value, CollectionKind, EncodingKind, FieldDef, FieldSpec, SchemaError,
    SchemaRegistry, FIELD_RESET_MARKER, FIELD_STREAM_END, FIRST_FIELD_ID,
};
