use serde_json::Value;

use crate::types::AreaId;

/// Persistence work the manager needs done, drained by the host via
/// [`crate::ReplicationManager::take_store_requests`] and answered through
/// the matching `complete_*` call.
///
/// The manager never issues two concurrent requests for the same key; the
/// host may freely run requests for different keys in parallel.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    LoadArea {
        area: AreaId,
    },
    /// Whole-area snapshot: every resident non-player entity, serialized.
    SaveArea {
        area: AreaId,
        entities: Vec<Value>,
    },
    LoadPlayer {
        player_key: String,
    },
    SavePlayer {
        player_key: String,
        entity: Value,
    },
}
