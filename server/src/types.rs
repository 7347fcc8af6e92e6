/// Process-unique entity id. Monotonically increasing, never reused; 0 means
/// "no entity".
pub type EntityId = u64;

/// Opaque visible-area key, supplied by the application's area function.
pub type AreaId = u64;

/// Key identifying a connected client.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub struct ClientKey(u64);

impl ClientKey {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(&self) -> u64 {
        self.0
    }
}
