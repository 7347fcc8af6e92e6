//! # Vantage Server
//! Server-side entity replication: field schema enforcement, visible-area
//! interest management, per-tick diff distribution and validated client
//! actions, driven by a poll-based manager with an external persistence
//! boundary.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod actions;
mod area;
mod client;
pub mod config;
mod entity;
pub mod error;
pub mod events;
pub mod hooks;
pub mod manager;
pub mod store;
pub mod types;

pub use actions::{ActionContext, ActionDef, ActionError, ActionHandler, ActionRegistry, ValueType};
pub use config::ReplicationConfig;
pub use entity::Entity;
pub use error::ReplicationError;
pub use events::ReplicationEvent;
pub use hooks::WorldHooks;
pub use manager::ReplicationManager;
pub use store::StoreRequest;
pub use types::{AreaId, ClientKey, EntityId};
