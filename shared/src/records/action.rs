//! The action request packet body: a count, then per action a presence-flags
//! byte followed by its optional pieces.

use serde_json::Value;

use super::error::RecordError;
use crate::packet::{PacketReader, PacketWriter};
use crate::schema::{SchemaRegistry, FIELD_RESET_MARKER, FIELD_STREAM_END};

pub const ACTION_FLAG_PREDICATE: u8 = 0x01;
pub const ACTION_FLAG_TARGET: u8 = 0x02;
pub const ACTION_FLAG_PAYLOAD: u8 = 0x04;
pub const ACTION_FLAG_ASSIGNMENTS: u8 = 0x08;

/// One proposed assignment inside an action request.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOp {
    Set(String, Value),
    /// Reset the field to its schema default (the wire's "use default" marker).
    ResetDefault(String),
}

impl AssignmentOp {
    pub fn field(&self) -> &str {
        match self {
            AssignmentOp::Set(name, _) | AssignmentOp::ResetDefault(name) => name,
        }
    }
}

/// A decoded client action request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action_id: String,
    /// Field name and expected previous value, compared as strings.
    pub predicate: Option<(String, String)>,
    /// Explicit target entity; absent means the caller's own entity.
    pub target: Option<u64>,
    pub payload: Option<Value>,
    pub assignments: Vec<AssignmentOp>,
}

impl ActionRequest {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            predicate: None,
            target: None,
            payload: None,
            assignments: Vec::new(),
        }
    }
}

pub fn write_actions(
    writer: &mut PacketWriter,
    registry: &SchemaRegistry,
    actions: &[ActionRequest],
) -> Result<(), RecordError> {
    writer.write_int(actions.len() as i64);
    for action in actions {
        let mut flags = 0u8;
        if action.predicate.is_some() {
            flags |= ACTION_FLAG_PREDICATE;
        }
        if action.target.is_some() {
            flags |= ACTION_FLAG_TARGET;
        }
        if action.payload.is_some() {
            flags |= ACTION_FLAG_PAYLOAD;
        }
        if !action.assignments.is_empty() {
            flags |= ACTION_FLAG_ASSIGNMENTS;
        }
        writer.write_int(i64::from(flags));
        writer.write_ansi_str(&action.action_id);
        if let Some((field, expected)) = &action.predicate {
            writer.write_str(field);
            writer.write_str(expected);
        }
        if let Some(target) = action.target {
            writer.write_uint(target)?;
        }
        if let Some(payload) = &action.payload {
            writer.write_json(payload);
        }
        if !action.assignments.is_empty() {
            for op in &action.assignments {
                match op {
                    AssignmentOp::Set(name, value) => {
                        let field = registry.require(name)?;
                        let Some(id) = field.id else {
                            continue;
                        };
                        writer.write_int(i64::from(id));
                        // proposed values travel as raw json; the action
                        // pipeline type-checks them against the definition
                        writer.write_json(value);
                    }
                    AssignmentOp::ResetDefault(name) => {
                        let field = registry.require(name)?;
                        let Some(id) = field.id else {
                            continue;
                        };
                        writer.write_int(i64::from(FIELD_RESET_MARKER));
                        writer.write_int(i64::from(id));
                    }
                }
            }
            writer.write_int(i64::from(FIELD_STREAM_END));
        }
    }
    Ok(())
}

pub fn read_actions(
    reader: &mut PacketReader<'_>,
    registry: &SchemaRegistry,
) -> Result<Vec<ActionRequest>, RecordError> {
    let count = reader.read_uint()?;
    let mut actions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let flags = reader.read_uint()? as u8;
        let mut action = ActionRequest::new(reader.read_ansi_str()?);
        if flags & ACTION_FLAG_PREDICATE != 0 {
            let field = reader.read_str()?;
            let expected = reader.read_str()?;
            action.predicate = Some((field, expected));
        }
        if flags & ACTION_FLAG_TARGET != 0 {
            action.target = Some(reader.read_uint()?);
        }
        if flags & ACTION_FLAG_PAYLOAD != 0 {
            action.payload = Some(reader.read_json()?);
        }
        if flags & ACTION_FLAG_ASSIGNMENTS != 0 {
            loop {
                let raw = reader.read_uint()?;
                if raw == u64::from(FIELD_STREAM_END) {
                    break;
                }
                if raw == u64::from(FIELD_RESET_MARKER) {
                    let id = reader.read_uint()?;
                    let field = registry.require_id(id as u16)?;
                    action
                        .assignments
                        .push(AssignmentOp::ResetDefault(field.name.clone()));
                    continue;
                }
                let field = registry.require_id(raw as u16)?;
                let value = reader.read_json()?;
                action
                    .assignments
                    .push(AssignmentOp::Set(field.name.clone(), value));
            }
        }
        actions.push(action);
    }
    Ok(actions)
}
