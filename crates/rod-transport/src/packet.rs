use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A transport-level datagram. `Unreliable` and `Reliable` carry an opaque
/// application payload; the transport never inspects it. `Ack` and
/// `Heartbeat` are internal to the reliability protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Unreliable { payload: Value, timestamp: f64 },
    Reliable { seq: u16, payload: Value, timestamp: f64 },
    Ack { ack_seq: u16, timestamp: f64 },
    Heartbeat { timestamp: f64 },
}

impl Packet {
    pub fn timestamp(&self) -> f64 {
        match self {
            Packet::Unreliable { timestamp, .. }
            | Packet::Reliable { timestamp, .. }
            | Packet::Ack { timestamp, .. }
            | Packet::Heartbeat { timestamp } => *timestamp,
        }
    }
}

/// The on-the-wire shape, matching §6 of the spec: a `type` discriminant
/// plus whichever fields that variant carries. `data`/`seq`/`ack_seq` are
/// omitted from the JSON rather than emitted as `null`, keeping encoded
/// packets compact prior to compression.
#[derive(Debug, Serialize, Deserialize)]
struct WireFormat {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    seq: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ack_seq: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    timestamp: f64,
}

const KIND_UNRELIABLE: u8 = 0;
const KIND_RELIABLE: u8 = 1;
const KIND_ACK: u8 = 2;
const KIND_HEARTBEAT: u8 = 3;

impl From<&Packet> for WireFormat {
    fn from(packet: &Packet) -> Self {
        match packet {
            Packet::Unreliable { payload, timestamp } => WireFormat {
                kind: KIND_UNRELIABLE,
                seq: None,
                ack_seq: None,
                data: Some(payload.clone()),
                timestamp: *timestamp,
            },
            Packet::Reliable { seq, payload, timestamp } => WireFormat {
                kind: KIND_RELIABLE,
                seq: Some(*seq),
                ack_seq: None,
                data: Some(payload.clone()),
                timestamp: *timestamp,
            },
            Packet::Ack { ack_seq, timestamp } => WireFormat {
                kind: KIND_ACK,
                seq: None,
                ack_seq: Some(*ack_seq),
                data: None,
                timestamp: *timestamp,
            },
            Packet::Heartbeat { timestamp } => WireFormat {
                kind: KIND_HEARTBEAT,
                seq: None,
                ack_seq: None,
                data: None,
                timestamp: *timestamp,
            },
        }
    }
}

impl TryFrom<WireFormat> for Packet {
    type Error = ();

    fn try_from(wire: WireFormat) -> Result<Self, Self::Error> {
        Ok(match wire.kind {
            KIND_UNRELIABLE => Packet::Unreliable {
                payload: wire.data.unwrap_or(Value::Null),
                timestamp: wire.timestamp,
            },
            KIND_RELIABLE => Packet::Reliable {
                seq: wire.seq.ok_or(())?,
                payload: wire.data.unwrap_or(Value::Null),
                timestamp: wire.timestamp,
            },
            KIND_ACK => Packet::Ack {
                ack_seq: wire.ack_seq.ok_or(())?,
                timestamp: wire.timestamp,
            },
            KIND_HEARTBEAT => Packet::Heartbeat {
                timestamp: wire.timestamp,
            },
            _ => return Err(()),
        })
    }
}

pub(crate) fn to_wire(packet: &Packet) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&WireFormat::from(packet))
}

pub(crate) fn from_wire(bytes: &[u8]) -> Option<Packet> {
    let wire: WireFormat = serde_json::from_slice(bytes).ok()?;
    Packet::try_from(wire).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_roundtrip_reliable() {
        let packet = Packet::Reliable {
            seq: 42,
            payload: json!({"type": "ping", "timestamp": 1.0}),
            timestamp: 123.456,
        };
        let bytes = to_wire(&packet).unwrap();
        let decoded = from_wire(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn wire_roundtrip_ack() {
        let packet = Packet::Ack { ack_seq: 7, timestamp: 0.0 };
        let bytes = to_wire(&packet).unwrap();
        assert_eq!(from_wire(&bytes).unwrap(), packet);
    }

    #[test]
    fn wire_roundtrip_heartbeat() {
        let packet = Packet::Heartbeat { timestamp: 9.0 };
        let bytes = to_wire(&packet).unwrap();
        assert_eq!(from_wire(&bytes).unwrap(), packet);
    }

    #[test]
    fn malformed_missing_seq_on_reliable_is_rejected() {
        let bytes = serde_json::to_vec(&json!({"type": 1, "timestamp": 0.0})).unwrap();
        assert!(from_wire(&bytes).is_none());
    }
}
