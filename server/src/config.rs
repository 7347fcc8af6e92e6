use std::time::Duration;

/// Tuning knobs for the replication manager.
#[derive(Clone, Debug)]
pub struct ReplicationConfig {
    /// Hard cap on dirty entities processed per tick; leftovers stay queued
    /// for the next tick.
    pub max_dirty_per_tick: usize,
    /// How long a loaded visible area with no subscribers may sit idle before
    /// it is unloaded.
    pub area_unload_timeout: Duration,
    /// Interval between persistence sweeps for dirty areas and players.
    pub save_interval: Duration,
    /// Emit packets in the verbose (type-tagged) wire mode.
    pub debug_wire: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_dirty_per_tick: 256,
            area_unload_timeout: Duration::from_secs(30),
            save_interval: Duration::from_secs(60),
            debug_wire: false,
        }
    }
}
