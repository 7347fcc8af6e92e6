//! Client-side view of the replicated entity population and the record
//! application rules. Applying the same diff twice is a no-op the second
//! time, and a `Full` record replaces an entity's state wholesale.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::update::{DiffChange, SubOp, UpdateRecord};
use crate::schema::{SchemaError, SchemaRegistry};

pub struct EntityView {
    schema: SchemaRegistry,
    pub entities: HashMap<u64, Map<String, Value>>,
    /// Application broadcasts, in arrival order.
    pub events: Vec<Value>,
}

impl EntityView {
    pub fn new(schema: SchemaRegistry) -> Self {
        Self {
            schema,
            entities: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// A field's current value, falling back to the schema default when the
    /// entity does not carry it.
    pub fn field(&self, entity: u64, name: &str) -> Value {
        if let Some(data) = self.entities.get(&entity) {
            if let Some(value) = data.get(name) {
                return value.clone();
            }
        }
        self.schema
            .get(name)
            .map(|f| f.default.clone())
            .unwrap_or(Value::Null)
    }

    pub fn apply(&mut self, records: &[UpdateRecord]) -> Result<(), SchemaError> {
        for record in records {
            match record {
                UpdateRecord::InitialList => {}
                UpdateRecord::Schema(descriptor) => {
                    self.schema = SchemaRegistry::from_descriptor(descriptor)?;
                }
                UpdateRecord::Full { entity, fields } => {
                    let mut data = Map::new();
                    for (name, value) in fields {
                        data.insert(name.clone(), value.clone());
                    }
                    self.entities.insert(*entity, data);
                }
                UpdateRecord::Diff { entity, changes } => {
                    // a diff for an entity we never saw is skipped, not an error
                    let Some(data) = self.entities.get_mut(entity) else {
                        continue;
                    };
                    for (name, change) in changes {
                        let default = self
                            .schema
                            .get(name)
                            .map(|f| f.default.clone())
                            .unwrap_or(Value::Null);
                        apply_change(data, name, change, default);
                    }
                }
                UpdateRecord::Delete { entity, .. } => {
                    self.entities.remove(entity);
                }
                UpdateRecord::Event(event) => self.events.push(event.clone()),
            }
        }
        Ok(())
    }
}

fn apply_change(data: &mut Map<String, Value>, name: &str, change: &DiffChange, default: Value) {
    match change {
        DiffChange::Scalar(value) => {
            data.insert(name.to_string(), value.clone());
        }
        DiffChange::Collection(ops) => {
            let slot = data.entry(name.to_string()).or_insert(default);
            for op in ops {
                match op {
                    SubOp::SetLength(len) => {
                        // on a record value the marker clears; on an array it
                        // truncates (or pads with nulls)
                        if let Some(record) = slot.as_object_mut() {
                            record.clear();
                        } else {
                            let array = ensure_array(slot);
                            array.resize(*len as usize, Value::Null);
                        }
                    }
                    SubOp::SetIndex(index, value) => {
                        let array = ensure_array(slot);
                        let index = *index as usize;
                        if array.len() <= index {
                            array.resize(index + 1, Value::Null);
                        }
                        array[index] = value.clone();
                    }
                    SubOp::SetKey(key, value) => {
                        let record = ensure_record(slot);
                        record.insert(key.clone(), value.clone());
                    }
                    SubOp::RemoveKey(key) => {
                        let record = ensure_record(slot);
                        record.remove(key);
                    }
                }
            }
        }
    }
}

fn ensure_array(slot: &mut Value) -> &mut Vec<Value> {
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut().expect("just ensured an array")
}

fn ensure_record(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut().expect("just ensured an object")
}
