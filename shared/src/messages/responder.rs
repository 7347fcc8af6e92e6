use log::error;
use serde_json::Value;

use super::envelope::{Body, Envelope};
use crate::packet::{Packet, PacketPool};

/// One-shot reply handle handed to the receiver of a message whose sender
/// expects a response.
///
/// Consuming `self` makes a double respond unrepresentable; dropping the
/// responder without using it logs an error, since the far end will sit on
/// its callback until the overdue warning fires.
pub struct Responder {
    correlation: u32,
    name: String,
    pool: PacketPool,
    debug: bool,
    sink: Option<Box<dyn FnOnce(Packet)>>,
}

impl Responder {
    pub fn new(
        correlation: u32,
        name: impl Into<String>,
        pool: &PacketPool,
        debug: bool,
        sink: Box<dyn FnOnce(Packet)>,
    ) -> Self {
        Self {
            correlation,
            name: name.into(),
            pool: pool.clone(),
            debug,
            sink: Some(sink),
        }
    }

    pub fn correlation(&self) -> u32 {
        self.correlation
    }

    pub fn respond(mut self, payload: Value) {
        self.send(Body::Json(payload));
    }

    pub fn respond_packet(mut self, payload: Packet) {
        self.send(Body::Packet(payload));
    }

    pub fn respond_err(mut self, message: impl Into<String>) {
        self.send(Body::Error(message.into()));
    }

    fn send(&mut self, body: Body) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        let packet = Envelope::response(self.correlation, body).write(&self.pool, self.debug);
        sink(packet);
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.sink.is_some() {
            error!(
                "responder for '{}' (correlation {}) dropped without responding",
                self.name, self.correlation
            );
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("correlation", &self.correlation)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::Responder;
    use crate::messages::{Body, Envelope, MessageId};
    use crate::packet::PacketPool;

    #[test]
    fn respond_emits_a_correlated_response() {
        let pool = PacketPool::new();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sink_sent = sent.clone();
        let responder = Responder::new(
            9,
            "ping",
            &pool,
            false,
            Box::new(move |packet| sink_sent.borrow_mut().push(packet)),
        );
        responder.respond(json!("pong"));

        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        let decoded = Envelope::read(&sent[0], &pool).unwrap();
        assert_eq!(decoded.id, MessageId::ResponseTo(9));
        match decoded.body {
            Body::Json(v) => assert_eq!(v, json!("pong")),
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
