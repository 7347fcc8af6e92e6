use std::collections::HashSet;
use std::time::Instant;

use crate::types::{ClientKey, EntityId};

/// One visible area's lifecycle record. Unloaded areas are simply absent
/// from the manager's map.
pub(crate) enum AreaRecord {
    /// A load request is outstanding with the external store. Everything that
    /// references the area in the meantime queues behind the single in-flight
    /// load.
    Loading {
        /// Clients that asked for the area while it was loading; load errors
        /// propagate to each of them.
        waiters: Vec<ClientKey>,
        /// Entities that moved in before the load settled; merged into the
        /// residents on completion.
        movers: HashSet<EntityId>,
        /// A save was requested mid-load; retried once loading completes.
        save_deferred: bool,
    },
    Loaded(LoadedArea),
}

pub(crate) struct LoadedArea {
    pub residents: HashSet<EntityId>,
    pub subscribers: u32,
    pub last_needed: Instant,
    pub need_save: bool,
    pub save_inflight: bool,
}

impl LoadedArea {
    pub fn new(now: Instant) -> Self {
        Self {
            residents: HashSet::new(),
            subscribers: 0,
            last_needed: now,
            need_save: false,
            save_inflight: false,
        }
    }

    /// Idle, unwatched and fully persisted: eligible for unload.
    pub fn unloadable(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.subscribers == 0
            && !self.need_save
            && !self.save_inflight
            && now.duration_since(self.last_needed) >= timeout
    }
}
