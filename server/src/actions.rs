use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use thiserror::Error;

use vantage_shared::SchemaRegistry;

use crate::types::{ClientKey, EntityId};

/// Runtime type a client assignment is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Number,
    Str,
    Array,
    Bool,
    Object,
    /// An explicit null: reset the field to its schema default.
    Delete,
}

impl ValueType {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueType::Delete,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::Str,
            Value::Array(_) => ValueType::Array,
            Value::Bool(_) => ValueType::Bool,
            Value::Object(_) => ValueType::Object,
        }
    }
}

/// Action validation failures. Each maps to a distinct wire error code; none
/// of them mutate entity state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action may only target the caller's own entity")]
    SelfOnly,

    #[error("caller has no entity to target")]
    NoEntity,

    #[error("predicate on '{field}' failed: expected '{expected}', found '{actual}'")]
    PredicateFailed {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("assignment to '{field}' is not permitted by this action")]
    BadAssignment { field: String },

    #[error("{0}")]
    Handler(String),
}

impl ActionError {
    /// The stable string code reported back over the wire.
    pub fn code(&self) -> &str {
        match self {
            ActionError::UnknownAction(_) => "unknown_action",
            ActionError::SelfOnly => "self_only",
            ActionError::NoEntity => "no_entity",
            ActionError::PredicateFailed { .. } => "predicate_failed",
            ActionError::BadAssignment { .. } => "bad_assignment",
            ActionError::Handler(message) => message,
        }
    }
}

/// Everything a handler sees about the action being executed.
pub struct ActionContext<'a> {
    pub client: ClientKey,
    pub action_id: &'a str,
    pub entity: EntityId,
    pub data: &'a Map<String, Value>,
    pub payload: Option<&'a Value>,
    /// The caller's proposed assignments, already validated.
    pub assignments: &'a [(String, Value)],
}

/// Application handler; runs after validation, before anything mutates, and
/// may contribute additional assignments of its own.
pub type ActionHandler = Box<dyn Fn(&ActionContext<'_>) -> Result<Vec<(String, Value)>, String>>;

/// Immutable, process-wide definition of one client-invokable action.
pub struct ActionDef {
    pub id: String,
    self_only: bool,
    allow_any: bool,
    allowed: HashMap<String, HashSet<ValueType>>,
    handler: Option<ActionHandler>,
}

impl ActionDef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            self_only: false,
            allow_any: false,
            allowed: HashMap::new(),
            handler: None,
        }
    }

    /// The action may only target the issuing client's own entity.
    pub fn self_only(mut self) -> Self {
        self.self_only = true;
        self
    }

    pub fn is_self_only(&self) -> bool {
        self.self_only
    }

    /// Permits assigning `field` with any of the listed runtime types.
    pub fn allow(mut self, field: impl Into<String>, types: &[ValueType]) -> Self {
        self.allowed
            .entry(field.into())
            .or_default()
            .extend(types.iter().copied());
        self
    }

    /// Skips per-field assignment checking entirely.
    pub fn allow_any(mut self) -> Self {
        self.allow_any = true;
        self
    }

    pub fn handler(mut self, handler: ActionHandler) -> Self {
        self.handler = Some(handler);
        self
    }
}

/// A fully-resolved action invocation, ready for validation.
pub struct ActionCall<'a> {
    pub client: ClientKey,
    pub action_id: &'a str,
    pub caller_entity: EntityId,
    pub target_entity: EntityId,
    /// Field name and expected previous value, compared as strings.
    pub predicate: Option<&'a (String, String)>,
    pub payload: Option<&'a Value>,
    /// Target entity's current data.
    pub data: &'a Map<String, Value>,
    /// Proposed assignments; a null value means reset-to-default.
    pub assignments: Vec<(String, Value)>,
}

/// Process-wide action table.
#[derive(Default)]
pub struct ActionRegistry {
    defs: HashMap<String, ActionDef>,
}

impl ActionRegistry {
    pub fn new(defs: Vec<ActionDef>) -> Self {
        let mut registry = Self {
            defs: HashMap::new(),
        };
        for def in defs {
            registry.defs.insert(def.id.clone(), def);
        }
        registry
    }

    pub fn get(&self, id: &str) -> Option<&ActionDef> {
        self.defs.get(id)
    }

    /// Validates and runs one action call.
    ///
    /// Returns every assignment to apply (the caller's plus any contributed
    /// by the handler). Validation failures short-circuit before the handler
    /// runs, and this function never mutates anything itself.
    pub fn execute(
        &self,
        schema: &SchemaRegistry,
        call: ActionCall<'_>,
    ) -> Result<Vec<(String, Value)>, ActionError> {
        let def = self
            .defs
            .get(call.action_id)
            .ok_or_else(|| ActionError::UnknownAction(call.action_id.to_string()))?;

        if def.self_only && call.target_entity != call.caller_entity {
            return Err(ActionError::SelfOnly);
        }

        // evaluated synchronously, before any handler gets a chance to run
        if let Some((field, expected)) = call.predicate {
            let current = call
                .data
                .get(field)
                .cloned()
                .or_else(|| schema.get(field).map(|f| f.default.clone()))
                .unwrap_or(Value::Null);
            let actual = predicate_string(&current);
            if &actual != expected {
                return Err(ActionError::PredicateFailed {
                    field: field.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        for (field, value) in &call.assignments {
            if schema.get(field).is_none() {
                return Err(ActionError::BadAssignment {
                    field: field.clone(),
                });
            }
            if def.allow_any {
                continue;
            }
            let permitted = def
                .allowed
                .get(field)
                .map(|types| types.contains(&ValueType::of(value)))
                .unwrap_or(false);
            if !permitted {
                return Err(ActionError::BadAssignment {
                    field: field.clone(),
                });
            }
        }

        let mut applied = call.assignments.clone();
        if let Some(handler) = &def.handler {
            let context = ActionContext {
                client: call.client,
                action_id: call.action_id,
                entity: call.target_entity,
                data: call.data,
                payload: call.payload,
                assignments: &call.assignments,
            };
            let contributed = handler(&context).map_err(ActionError::Handler)?;
            applied.extend(contributed);
        }
        Ok(applied)
    }
}

/// The predicate comparison works on string renderings of values: bare
/// strings stay bare, null renders empty, everything else uses its JSON form.
pub(crate) fn predicate_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
