use std::collections::HashMap;

use serde_json::{json, Value};

use super::error::SchemaError;
use super::field::{CollectionKind, EncodingKind, FieldDef, FieldSpec};

/// Field id 0 terminates every field stream on the wire.
pub const FIELD_STREAM_END: u16 = 0;
/// Field id 1 is the "reset to schema default" marker in assignment streams.
pub const FIELD_RESET_MARKER: u16 = 1;
/// First wire id actually assigned to a field.
pub const FIRST_FIELD_ID: u16 = 2;

/// Process-wide field table, built once at startup from declarative specs and
/// passed by reference into the replication and codec layers.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    fields: Vec<FieldDef>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u16, usize>,
}

impl SchemaRegistry {
    pub fn new(specs: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        let mut registry = Self {
            fields: Vec::with_capacity(specs.len()),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        };
        let mut next_id = FIRST_FIELD_ID;
        for spec in specs {
            if registry.by_name.contains_key(&spec.name) {
                return Err(SchemaError::DuplicateField { name: spec.name });
            }
            let id = if spec.server_only {
                None
            } else {
                let id = next_id;
                next_id += 1;
                Some(id)
            };
            let index = registry.fields.len();
            let def = FieldDef {
                name: spec.name,
                id,
                encoding: spec.encoding,
                collection: spec.collection,
                default: spec.default,
                ephemeral: spec.ephemeral,
                server_only: spec.server_only,
            };
            registry.by_name.insert(def.name.clone(), index);
            if let Some(id) = id {
                registry.by_id.insert(id, index);
            }
            registry.fields.push(def);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.by_name.get(name).map(|i| &self.fields[*i])
    }

    pub fn by_id(&self, id: u16) -> Option<&FieldDef> {
        self.by_id.get(&id).map(|i| &self.fields[*i])
    }

    pub fn require(&self, name: &str) -> Result<&FieldDef, SchemaError> {
        self.get(name).ok_or_else(|| SchemaError::UnknownField {
            name: name.to_string(),
        })
    }

    pub fn require_id(&self, id: u16) -> Result<&FieldDef, SchemaError> {
        self.by_id(id).ok_or(SchemaError::UnknownFieldId { id })
    }

    /// All fields, registration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    /// Replicated fields, ascending wire id.
    pub fn replicated(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.id.is_some())
    }

    /// The client-facing schema: a JSON array of field descriptors ordered by
    /// wire id. Encoding and collection kinds are omitted when they are the
    /// defaults, as is an absent default value.
    pub fn descriptor(&self) -> Value {
        let mut entries = Vec::new();
        for field in self.replicated() {
            let mut entry = json!({ "name": field.name });
            let map = entry.as_object_mut().expect("just built an object");
            if field.encoding != EncodingKind::Json {
                map.insert("enc".into(), Value::String(field.encoding.name().into()));
            }
            if field.collection != CollectionKind::None {
                map.insert(
                    "coll".into(),
                    Value::String(field.collection.name().into()),
                );
            }
            if !field.default.is_null() {
                map.insert("def".into(), field.default.clone());
            }
            entries.push(entry);
        }
        Value::Array(entries)
    }

    /// Rebuilds a registry from a received descriptor; the client-side mirror
    /// of [`descriptor`](Self::descriptor). Ids are re-derived from array
    /// order, which the descriptor guarantees.
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, SchemaError> {
        let entries = descriptor
            .as_array()
            .ok_or_else(|| SchemaError::BadDescriptor {
                reason: "descriptor is not an array".into(),
            })?;
        let mut specs = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::BadDescriptor {
                    reason: "field entry without a name".into(),
                })?;
            let mut spec = FieldSpec::new(name);
            if let Some(enc) = entry.get("enc").and_then(Value::as_str) {
                spec.encoding =
                    EncodingKind::from_name(enc).ok_or_else(|| SchemaError::BadDescriptor {
                        reason: format!("unknown encoding '{enc}'"),
                    })?;
            }
            if let Some(coll) = entry.get("coll").and_then(Value::as_str) {
                spec.collection =
                    CollectionKind::from_name(coll).ok_or_else(|| SchemaError::BadDescriptor {
                        reason: format!("unknown collection kind '{coll}'"),
                    })?;
            }
            if let Some(def) = entry.get("def") {
                spec.default = def.clone();
            }
            specs.push(spec);
        }
        Self::new(specs)
    }
}
