use serde_json::{Map, Value};

use crate::types::AreaId;

/// Application callbacks the replication manager needs but cannot supply:
/// spatial partitioning, initial content and load-time fixups.
///
/// All hooks run synchronously between suspension points.
pub trait WorldHooks {
    /// Computes an entity's visible-area key from its data. Must be a pure
    /// function of the data.
    fn area_of(&self, data: &Map<String, Value>) -> AreaId;

    /// Initial data for a player seen for the first time.
    fn new_player(&self, player_key: &str) -> Map<String, Value>;

    /// Seed content for a visible area whose first-ever load found nothing.
    fn populate_area(&self, _area: AreaId) -> Vec<Map<String, Value>> {
        Vec::new()
    }

    /// Fixup applied to each entity's data after it is read back from the
    /// persistent store, before it rejoins the live set.
    fn post_load(&self, _data: &mut Map<String, Value>) {}
}
