use std::collections::HashSet;

use vantage_shared::PendingResponses;

use crate::types::{AreaId, EntityId};

/// Per-connection replication state.
pub(crate) struct Client {
    /// The client's avatar entity; 0 until a join completes.
    pub entity: EntityId,
    /// Entities this client has received at least one full snapshot of.
    pub known: HashSet<EntityId>,
    /// Visible areas the client currently needs, in request order.
    pub needed: Vec<AreaId>,
    /// Persistence key for the avatar; set by join.
    pub player_key: Option<String>,
    /// Re-entrancy guard: a player load is in flight.
    pub loading: bool,
    /// Disconnected while loading; teardown is deferred until the load
    /// settles rather than racing it.
    pub disconnected: bool,
    /// The schema descriptor is sent at most once per connection lifetime.
    pub sent_schema: bool,
    /// Requests this peer still owes us responses for.
    pub pending: PendingResponses,
}

impl Client {
    pub fn new() -> Self {
        Self {
            entity: 0,
            known: HashSet::new(),
            needed: Vec::new(),
            player_key: None,
            loading: false,
            disconnected: false,
            sent_schema: false,
            pending: PendingResponses::new(),
        }
    }

    pub fn subscribed_to(&self, area: AreaId) -> bool {
        self.needed.contains(&area)
    }
}
