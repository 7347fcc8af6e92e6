//! Tagged record formats for entity update packets and action request
//! bodies, plus the client-side application rules.

mod action;
mod apply;
mod error;
mod update;

pub use action::{
    read_actions, write_actions, ActionRequest, AssignmentOp, ACTION_FLAG_ASSIGNMENTS,
    ACTION_FLAG_PAYLOAD, ACTION_FLAG_PREDICATE, ACTION_FLAG_TARGET,
};
pub use apply::EntityView;
pub use error::RecordError;
pub use update::{
    read_update, write_delete, write_diff, write_event, write_full, write_initial_list,
    write_schema, write_terminate, DiffChange, SubOp, UpdateRecord, TAG_DELETE, TAG_DIFF,
    TAG_EVENT, TAG_FULL, TAG_INITIAL_LIST, TAG_SCHEMA, TAG_TERMINATE,
};
