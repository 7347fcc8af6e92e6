use serde_json::Value;

use super::error::MessageError;
use crate::packet::{Packet, PacketPool, PacketWriter};

/// Flag byte bit 1: the identifier is a packed-int response correlation id
/// rather than a message name.
pub const FLAG_RESPONSE: u8 = 0x02;
/// Flag byte bit 2: an error string follows the correlation id, and nothing
/// else.
pub const FLAG_ERROR: u8 = 0x04;
/// Flag byte bit 3: the payload is an embedded sub-packet rather than a
/// length-prefixed JSON string.
pub const FLAG_PACKET_PAYLOAD: u8 = 0x08;

/// Message identifier: a named push/request, or a numbered response
/// correlating back to an earlier request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageId {
    Name(String),
    ResponseTo(u32),
}

/// Envelope body: an error string terminates the message; otherwise the
/// payload is JSON or an embedded sub-packet, selected by a flag bit.
#[derive(Debug)]
pub enum Body {
    Error(String),
    Json(Value),
    Packet(Packet),
}

/// The acknowledged-message framing that wraps every application message.
#[derive(Debug)]
pub struct Envelope {
    pub id: MessageId,
    /// 0 means no response is expected.
    pub correlation: u32,
    pub body: Body,
}

impl Envelope {
    pub fn push(name: impl Into<String>, body: Body) -> Self {
        Self {
            id: MessageId::Name(name.into()),
            correlation: 0,
            body,
        }
    }

    pub fn request(name: impl Into<String>, correlation: u32, body: Body) -> Self {
        Self {
            id: MessageId::Name(name.into()),
            correlation,
            body,
        }
    }

    pub fn response(respond_to: u32, body: Body) -> Self {
        Self {
            id: MessageId::ResponseTo(respond_to),
            correlation: 0,
            body,
        }
    }

    /// Encodes the envelope into a fresh packet.
    pub fn write(&self, pool: &PacketPool, debug: bool) -> Packet {
        let mut writer = PacketWriter::new_with_mode(pool, debug);
        match &self.id {
            MessageId::Name(name) => writer.write_ansi_str(name),
            MessageId::ResponseTo(id) => {
                writer.set_flag(FLAG_RESPONSE);
                writer.write_int(i64::from(*id));
            }
        }
        writer.write_int(i64::from(self.correlation));
        match &self.body {
            Body::Error(message) => {
                writer.set_flag(FLAG_ERROR);
                writer.write_str(message);
            }
            Body::Json(value) => writer.write_json(value),
            Body::Packet(packet) => {
                writer.set_flag(FLAG_PACKET_PAYLOAD);
                writer.write_packet(packet);
            }
        }
        writer.finish()
    }

    /// Decodes an envelope from a received packet.
    pub fn read(packet: &Packet, pool: &PacketPool) -> Result<Self, MessageError> {
        let flags = packet.flags();
        let mut reader = packet.reader();

        let id = if flags & FLAG_RESPONSE != 0 {
            let raw = reader.read_int()?;
            let id = u32::try_from(raw).map_err(|_| crate::packet::CodecError::IntOutOfRange {
                magnitude: raw.unsigned_abs(),
            })?;
            MessageId::ResponseTo(id)
        } else {
            MessageId::Name(reader.read_ansi_str()?)
        };

        let raw = reader.read_int()?;
        let correlation =
            u32::try_from(raw).map_err(|_| crate::packet::CodecError::IntOutOfRange {
                magnitude: raw.unsigned_abs(),
            })?;

        let body = if flags & FLAG_ERROR != 0 {
            Body::Error(reader.read_str()?)
        } else if flags & FLAG_PACKET_PAYLOAD != 0 {
            Body::Packet(reader.read_packet(pool)?)
        } else {
            Body::Json(reader.read_json()?)
        };

        Ok(Self {
            id,
            correlation,
            body,
        })
    }
}
