use serde_json::Value;

use vantage_shared::Responder;

use crate::types::{AreaId, ClientKey, EntityId};

/// Things the application polls out of the manager after store completions
/// and message dispatch.
#[derive(Debug)]
pub enum ReplicationEvent {
    /// A join finished: the client's avatar entity is live.
    ClientReady {
        client: ClientKey,
        entity: EntityId,
    },
    /// A join failed at the store; the client is back to an unjoined state.
    ClientJoinFailed {
        client: ClientKey,
        error: String,
    },
    /// An area load failed; every queued waiter is listed.
    AreaLoadFailed {
        area: AreaId,
        error: String,
        waiters: Vec<ClientKey>,
    },
    /// An application-registered message arrived. When the sender expects a
    /// response the responder is present and must be consumed exactly once.
    Message {
        client: ClientKey,
        name: String,
        payload: Value,
        responder: Option<Responder>,
    },
}
