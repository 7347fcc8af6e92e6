//! The entity update packet body: a sequence of tagged records, terminated by
//! [`TAG_TERMINATE`].

use serde_json::Value;

use super::error::RecordError;
use crate::packet::{PacketReader, PacketWriter};
use crate::schema::{
    read_value, write_value, CollectionKind, SchemaRegistry, FIELD_STREAM_END,
};

pub const TAG_TERMINATE: i64 = 0;
pub const TAG_SCHEMA: i64 = 1;
pub const TAG_FULL: i64 = 2;
pub const TAG_DIFF: i64 = 3;
pub const TAG_DELETE: i64 = 4;
pub const TAG_EVENT: i64 = 5;
/// Leading tag: this packet carries nothing but first-sight full snapshots.
pub const TAG_INITIAL_LIST: i64 = 6;

const SUB_END: i64 = 0;
const SUB_SET_LENGTH: i64 = 1;
const SUB_SET_ELEMENT: i64 = 2;
const SUB_REMOVE_KEY: i64 = 3;

/// One sub-collection mutation inside a diff entry.
#[derive(Debug, Clone, PartialEq)]
pub enum SubOp {
    /// Array truncation (or extension with nulls); on a record field this
    /// marker clears every key, used when a whole record is restated.
    SetLength(u64),
    SetIndex(u64, Value),
    SetKey(String, Value),
    RemoveKey(String),
}

/// One field's worth of change inside a `Diff` record.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffChange {
    Scalar(Value),
    Collection(Vec<SubOp>),
}

/// A decoded update-body record.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateRecord {
    InitialList,
    Schema(Value),
    Full {
        entity: u64,
        fields: Vec<(String, Value)>,
    },
    Diff {
        entity: u64,
        changes: Vec<(String, DiffChange)>,
    },
    Delete {
        entity: u64,
        reason: String,
    },
    Event(Value),
}

pub fn write_initial_list(writer: &mut PacketWriter) {
    writer.write_int(TAG_INITIAL_LIST);
}

pub fn write_schema(writer: &mut PacketWriter, registry: &SchemaRegistry) {
    writer.write_int(TAG_SCHEMA);
    writer.write_json(&registry.descriptor());
}

/// Full snapshot: every non-default replicated field, ascending wire id.
pub fn write_full(
    writer: &mut PacketWriter,
    registry: &SchemaRegistry,
    entity: u64,
    data: &serde_json::Map<String, Value>,
) -> Result<(), RecordError> {
    writer.write_int(TAG_FULL);
    writer.write_uint(entity)?;
    for field in registry.replicated() {
        let Some(value) = data.get(&field.name) else {
            continue;
        };
        if *value == field.default {
            continue;
        }
        let id = field.id.expect("replicated fields carry an id");
        writer.write_int(i64::from(id));
        write_value(writer, field, value)?;
    }
    writer.write_int(i64::from(FIELD_STREAM_END));
    Ok(())
}

/// Diff record from pre-computed per-field changes.
pub fn write_diff(
    writer: &mut PacketWriter,
    registry: &SchemaRegistry,
    entity: u64,
    changes: &[(String, DiffChange)],
) -> Result<(), RecordError> {
    writer.write_int(TAG_DIFF);
    writer.write_uint(entity)?;
    for (name, change) in changes {
        let field = registry.require(name)?;
        let Some(id) = field.id else {
            continue; // server_only fields never reach the wire
        };
        match (field.collection, change) {
            (CollectionKind::None, DiffChange::Scalar(value)) => {
                writer.write_int(i64::from(id));
                write_value(writer, field, value)?;
            }
            (CollectionKind::Array | CollectionKind::Record, DiffChange::Collection(ops)) => {
                writer.write_int(i64::from(id));
                for op in ops {
                    match op {
                        SubOp::SetLength(len) => {
                            writer.write_int(SUB_SET_LENGTH);
                            writer.write_uint(*len)?;
                        }
                        SubOp::SetIndex(index, value) => {
                            writer.write_int(SUB_SET_ELEMENT);
                            writer.write_uint(*index)?;
                            write_value(writer, field, value)?;
                        }
                        SubOp::SetKey(key, value) => {
                            writer.write_int(SUB_SET_ELEMENT);
                            writer.write_str(key);
                            write_value(writer, field, value)?;
                        }
                        SubOp::RemoveKey(key) => {
                            writer.write_int(SUB_REMOVE_KEY);
                            writer.write_str(key);
                        }
                    }
                }
                writer.write_int(SUB_END);
            }
            _ => {
                return Err(RecordError::CollectionMismatch {
                    field: name.clone(),
                })
            }
        }
    }
    writer.write_int(i64::from(FIELD_STREAM_END));
    Ok(())
}

pub fn write_delete(
    writer: &mut PacketWriter,
    entity: u64,
    reason: &str,
) -> Result<(), RecordError> {
    writer.write_int(TAG_DELETE);
    writer.write_uint(entity)?;
    writer.write_str(reason);
    Ok(())
}

pub fn write_event(writer: &mut PacketWriter, event: &Value) {
    writer.write_int(TAG_EVENT);
    writer.write_json(event);
}

pub fn write_terminate(writer: &mut PacketWriter) {
    writer.write_int(TAG_TERMINATE);
}

/// Decodes a whole update body. `registry` must describe the same schema the
/// sender encoded with (clients rebuild it from the `Schema` record).
pub fn read_update(
    reader: &mut PacketReader<'_>,
    registry: &SchemaRegistry,
) -> Result<Vec<UpdateRecord>, RecordError> {
    let mut records = Vec::new();
    loop {
        let tag = reader.read_int()?;
        match tag {
            TAG_TERMINATE => return Ok(records),
            TAG_INITIAL_LIST => records.push(UpdateRecord::InitialList),
            TAG_SCHEMA => records.push(UpdateRecord::Schema(reader.read_json()?)),
            TAG_FULL => {
                let entity = reader.read_uint()?;
                let mut fields = Vec::new();
                loop {
                    let id = reader.read_int()?;
                    if id == i64::from(FIELD_STREAM_END) {
                        break;
                    }
                    let field = registry.require_id(field_id(id)?)?;
                    let value = read_value(reader, field)?;
                    fields.push((field.name.clone(), value));
                }
                records.push(UpdateRecord::Full { entity, fields });
            }
            TAG_DIFF => {
                let entity = reader.read_uint()?;
                let mut changes = Vec::new();
                loop {
                    let id = reader.read_int()?;
                    if id == i64::from(FIELD_STREAM_END) {
                        break;
                    }
                    let field = registry.require_id(field_id(id)?)?;
                    let change = match field.collection {
                        CollectionKind::None => DiffChange::Scalar(read_value(reader, field)?),
                        CollectionKind::Array => {
                            let mut ops = Vec::new();
                            loop {
                                match reader.read_int()? {
                                    SUB_END => break,
                                    SUB_SET_LENGTH => {
                                        ops.push(SubOp::SetLength(reader.read_uint()?))
                                    }
                                    SUB_SET_ELEMENT => {
                                        let index = reader.read_uint()?;
                                        ops.push(SubOp::SetIndex(
                                            index,
                                            read_value(reader, field)?,
                                        ));
                                    }
                                    tag => return Err(RecordError::UnknownSubOpTag { tag }),
                                }
                            }
                            DiffChange::Collection(ops)
                        }
                        CollectionKind::Record => {
                            let mut ops = Vec::new();
                            loop {
                                match reader.read_int()? {
                                    SUB_END => break,
                                    // for records the set-length marker clears
                                    SUB_SET_LENGTH => {
                                        ops.push(SubOp::SetLength(reader.read_uint()?))
                                    }
                                    SUB_SET_ELEMENT => {
                                        let key = reader.read_str()?;
                                        ops.push(SubOp::SetKey(key, read_value(reader, field)?));
                                    }
                                    SUB_REMOVE_KEY => {
                                        ops.push(SubOp::RemoveKey(reader.read_str()?))
                                    }
                                    tag => return Err(RecordError::UnknownSubOpTag { tag }),
                                }
                            }
                            DiffChange::Collection(ops)
                        }
                    };
                    changes.push((field.name.clone(), change));
                }
                records.push(UpdateRecord::Diff { entity, changes });
            }
            TAG_DELETE => {
                let entity = reader.read_uint()?;
                let reason = reader.read_str()?;
                records.push(UpdateRecord::Delete { entity, reason });
            }
            TAG_EVENT => records.push(UpdateRecord::Event(reader.read_json()?)),
            tag => return Err(RecordError::UnknownRecordTag { tag }),
        }
    }
}

fn field_id(raw: i64) -> Result<u16, RecordError> {
    u16::try_from(raw).map_err(|_| {
        RecordError::Codec(crate::packet::CodecError::IntOutOfRange {
            magnitude: raw.unsigned_abs(),
        })
    })
}
