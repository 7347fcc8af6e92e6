use thiserror::Error;

use vantage_shared::{MessageError, RecordError, SchemaError};

use crate::types::{AreaId, ClientKey, EntityId};

/// Errors surfaced by the replication manager
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Unknown client {0:?}")]
    UnknownClient(ClientKey),

    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("Client {0:?} already has a join in flight")]
    JoinInFlight(ClientKey),

    #[error("No load in flight for visible area {0}")]
    NoAreaLoadInFlight(AreaId),

    #[error("No load in flight for player '{0}'")]
    NoPlayerLoadInFlight(String),

    #[error("No save in flight for key '{0}'")]
    NoSaveInFlight(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Message(#[from] MessageError),
}
