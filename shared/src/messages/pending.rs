use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::warn;
use serde_json::Value;

use super::error::MessageError;
use crate::packet::Packet;

/// How long a request may stay unanswered before a diagnostic warning is
/// logged. The callback stays live; only a real response or a disconnect
/// settles it.
pub const RESPONSE_WARN_INTERVAL: Duration = Duration::from_secs(15);

/// A successful reply payload.
#[derive(Debug)]
pub enum Reply {
    Json(Value),
    Packet(Packet),
}

pub type ReplyResult = Result<Reply, MessageError>;

/// Callback invoked exactly once when the correlated response (or the
/// disconnect sweep) arrives. `FnOnce` ownership is the exactly-once guard.
pub type ResponseCallback = Box<dyn FnOnce(ReplyResult)>;

struct PendingEntry {
    name: String,
    sent_at: Instant,
    warned: bool,
    callback: ResponseCallback,
}

/// Per-peer table of requests still waiting for their response.
pub struct PendingResponses {
    next_id: u32,
    entries: HashMap<u32, PendingEntry>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a callback and returns the correlation id to put on the wire.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        now: Instant,
        callback: ResponseCallback,
    ) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.entries.insert(
            id,
            PendingEntry {
                name: name.into(),
                sent_at: now,
                warned: false,
                callback,
            },
        );
        id
    }

    /// Removes exactly one entry and invokes its callback. A response with no
    /// matching entry is a protocol error, reported to the caller.
    pub fn settle(&mut self, id: u32, reply: ReplyResult) -> Result<(), MessageError> {
        let Some(entry) = self.entries.remove(&id) else {
            warn!("response {id} has no pending request");
            return Err(MessageError::UnknownResponse { id });
        };
        (entry.callback)(reply);
        Ok(())
    }

    /// Logs a warning, once per entry, for requests pending longer than
    /// [`RESPONSE_WARN_INTERVAL`]. Diagnostic only.
    pub fn check_overdue(&mut self, now: Instant) {
        for (id, entry) in &mut self.entries {
            if !entry.warned && now.duration_since(entry.sent_at) >= RESPONSE_WARN_INTERVAL {
                entry.warned = true;
                warn!(
                    "request '{}' (id {id}) still unanswered after {:?}",
                    entry.name, RESPONSE_WARN_INTERVAL
                );
            }
        }
    }

    /// Synchronously fails every still-pending callback with `error` and
    /// leaves the table empty. Used on peer disconnect.
    pub fn fail_all(&mut self, error: MessageError) {
        for (_, entry) in self.entries.drain() {
            (entry.callback)(Err(error.clone()));
        }
    }
}

impl Default for PendingResponses {
    fn default() -> Self {
        Self::new()
    }
}
