use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::{Map, Value};

use vantage_shared::{CollectionKind, DiffChange, SchemaRegistry, SubOp};

use crate::types::{AreaId, EntityId};

/// Dirty bookkeeping for one sub-collection field since the last tick.
#[derive(Debug, Clone)]
pub(crate) enum DirtySub {
    /// The whole collection was replaced; the diff re-states it.
    Whole,
    Array {
        indices: BTreeSet<u64>,
        new_len: Option<u64>,
    },
    Record {
        set: BTreeSet<String>,
        removed: BTreeSet<String>,
    },
}

/// A live replicated entity.
///
/// Field values live in a JSON map; a field absent from the map reads as its
/// schema default. Mutations go through the manager, which validates names
/// against the schema and queues the entity for the next tick's diff.
pub struct Entity {
    pub(crate) id: EntityId,
    pub(crate) data: Map<String, Value>,
    /// Area computed from the data by the application's area function.
    pub(crate) current_area: AreaId,
    dirty: HashSet<String>,
    dirty_subs: BTreeMap<String, DirtySub>,
    pub(crate) need_save: bool,
    pub(crate) is_player: bool,
    /// Overrides the default `"newva"` reason on the next delete record.
    pub(crate) delete_reason: Option<String>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, data: Map<String, Value>, area: AreaId, is_player: bool) -> Self {
        Self {
            id,
            data,
            current_area: area,
            dirty: HashSet::new(),
            dirty_subs: BTreeMap::new(),
            need_save: false,
            is_player,
            delete_reason: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn area(&self) -> AreaId {
        self.current_area
    }

    pub fn is_player(&self) -> bool {
        self.is_player
    }

    pub(crate) fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub(crate) fn field(&self, registry: &SchemaRegistry, name: &str) -> Value {
        if let Some(value) = self.data.get(name) {
            return value.clone();
        }
        registry
            .get(name)
            .map(|f| f.default.clone())
            .unwrap_or(Value::Null)
    }

    pub(crate) fn set_field(&mut self, collection: CollectionKind, name: &str, value: Value) {
        self.data.insert(name.to_string(), value);
        self.mark_whole(collection, name);
    }

    /// Removes the field so it reads as its schema default again.
    pub(crate) fn reset_field(&mut self, collection: CollectionKind, name: &str) {
        self.data.remove(name);
        self.mark_whole(collection, name);
    }

    fn mark_whole(&mut self, collection: CollectionKind, name: &str) {
        self.dirty.insert(name.to_string());
        self.need_save = true;
        if collection != CollectionKind::None {
            self.dirty_subs.insert(name.to_string(), DirtySub::Whole);
        }
    }

    pub(crate) fn set_index(&mut self, name: &str, index: u64, value: Value) {
        let slot = self
            .data
            .entry(name.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        let array = slot.as_array_mut().expect("just ensured an array");
        let i = index as usize;
        if array.len() <= i {
            array.resize(i + 1, Value::Null);
        }
        array[i] = value;

        self.dirty.insert(name.to_string());
        self.need_save = true;
        match self.dirty_subs.get_mut(name) {
            Some(DirtySub::Whole) => {}
            Some(DirtySub::Array { indices, .. }) => {
                indices.insert(index);
            }
            _ => {
                self.dirty_subs.insert(
                    name.to_string(),
                    DirtySub::Array {
                        indices: BTreeSet::from([index]),
                        new_len: None,
                    },
                );
            }
        }
    }

    pub(crate) fn set_length(&mut self, name: &str, len: u64) {
        let slot = self
            .data
            .entry(name.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        let array = slot.as_array_mut().expect("just ensured an array");
        array.resize(len as usize, Value::Null);

        self.dirty.insert(name.to_string());
        self.need_save = true;
        match self.dirty_subs.get_mut(name) {
            Some(DirtySub::Whole) => {}
            Some(DirtySub::Array { indices, new_len }) => {
                *new_len = Some(len);
                indices.retain(|i| *i < len);
            }
            _ => {
                self.dirty_subs.insert(
                    name.to_string(),
                    DirtySub::Array {
                        indices: BTreeSet::new(),
                        new_len: Some(len),
                    },
                );
            }
        }
    }

    pub(crate) fn set_key(&mut self, name: &str, key: &str, value: Value) {
        let slot = self
            .data
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        slot.as_object_mut()
            .expect("just ensured an object")
            .insert(key.to_string(), value);

        self.dirty.insert(name.to_string());
        self.need_save = true;
        match self.dirty_subs.get_mut(name) {
            Some(DirtySub::Whole) => {}
            Some(DirtySub::Record { set, removed }) => {
                removed.remove(key);
                set.insert(key.to_string());
            }
            _ => {
                self.dirty_subs.insert(
                    name.to_string(),
                    DirtySub::Record {
                        set: BTreeSet::from([key.to_string()]),
                        removed: BTreeSet::new(),
                    },
                );
            }
        }
    }

    pub(crate) fn remove_key(&mut self, name: &str, key: &str) {
        if let Some(record) = self.data.get_mut(name).and_then(Value::as_object_mut) {
            record.remove(key);
        }

        self.dirty.insert(name.to_string());
        self.need_save = true;
        match self.dirty_subs.get_mut(name) {
            Some(DirtySub::Whole) => {}
            Some(DirtySub::Record { set, removed }) => {
                set.remove(key);
                removed.insert(key.to_string());
            }
            _ => {
                self.dirty_subs.insert(
                    name.to_string(),
                    DirtySub::Record {
                        set: BTreeSet::new(),
                        removed: BTreeSet::from([key.to_string()]),
                    },
                );
            }
        }
    }

    /// Takes and clears the dirty sets. Cleared before encoding, so a failure
    /// mid-encode cannot leave the same dirty state reprocessed forever.
    pub(crate) fn take_dirty(&mut self) -> (HashSet<String>, BTreeMap<String, DirtySub>) {
        (
            std::mem::take(&mut self.dirty),
            std::mem::take(&mut self.dirty_subs),
        )
    }

    /// Turns taken dirty sets into the per-field changes of a diff record.
    pub(crate) fn build_changes(
        &self,
        registry: &SchemaRegistry,
        dirty: &HashSet<String>,
        subs: &BTreeMap<String, DirtySub>,
    ) -> Vec<(String, DiffChange)> {
        let mut names: Vec<&String> = dirty.iter().collect();
        names.sort();
        let mut changes = Vec::with_capacity(names.len());
        for name in names {
            let Some(field) = registry.get(name) else {
                continue;
            };
            if field.id.is_none() {
                continue; // server_only: persisted, never replicated
            }
            let change = match field.collection {
                CollectionKind::None => DiffChange::Scalar(self.field(registry, name)),
                CollectionKind::Array | CollectionKind::Record => {
                    let sub = subs.get(name).unwrap_or(&DirtySub::Whole);
                    DiffChange::Collection(self.build_sub_ops(registry, name, field.collection, sub))
                }
            };
            changes.push((name.clone(), change));
        }
        changes
    }

    fn build_sub_ops(
        &self,
        registry: &SchemaRegistry,
        name: &str,
        collection: CollectionKind,
        sub: &DirtySub,
    ) -> Vec<SubOp> {
        let value = self.field(registry, name);
        match (collection, sub) {
            // scalar fields diff through build_changes, never through sub ops
            (CollectionKind::None, _) => Vec::new(),
            // whole replacement restates the collection element by element
            (CollectionKind::Array, DirtySub::Whole) => {
                let array = value.as_array().cloned().unwrap_or_default();
                let mut ops = vec![SubOp::SetLength(array.len() as u64)];
                for (i, element) in array.into_iter().enumerate() {
                    ops.push(SubOp::SetIndex(i as u64, element));
                }
                ops
            }
            (CollectionKind::Record, DirtySub::Whole) => {
                let record = value.as_object().cloned().unwrap_or_default();
                let mut ops = vec![SubOp::SetLength(0)]; // clears the record
                for (key, element) in record {
                    ops.push(SubOp::SetKey(key, element));
                }
                ops
            }
            (_, DirtySub::Array { indices, new_len }) => {
                let array = value.as_array().cloned().unwrap_or_default();
                let mut ops = Vec::new();
                if let Some(len) = new_len {
                    ops.push(SubOp::SetLength(*len));
                }
                for index in indices {
                    let element = array
                        .get(*index as usize)
                        .cloned()
                        .unwrap_or(Value::Null);
                    ops.push(SubOp::SetIndex(*index, element));
                }
                ops
            }
            (_, DirtySub::Record { set, removed }) => {
                let record = value.as_object().cloned().unwrap_or_default();
                let mut ops = Vec::new();
                for key in removed {
                    ops.push(SubOp::RemoveKey(key.clone()));
                }
                for key in set {
                    let element = record.get(key).cloned().unwrap_or(Value::Null);
                    ops.push(SubOp::SetKey(key.clone(), element));
                }
                ops
            }
        }
    }

    /// Persistence form: every non-ephemeral field currently carried.
    pub(crate) fn serialize(&self, registry: &SchemaRegistry) -> Value {
        let mut out = Map::new();
        for (name, value) in &self.data {
            let ephemeral = registry.get(name).map(|f| f.ephemeral).unwrap_or(false);
            if !ephemeral {
                out.insert(name.clone(), value.clone());
            }
        }
        Value::Object(out)
    }
}
