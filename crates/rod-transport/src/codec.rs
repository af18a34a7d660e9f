use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::TransportError;
use crate::packet::{from_wire, to_wire, Packet};

/// Serialize a packet to the wire form: structured payload -> JSON -> zlib.
/// Rejects payloads whose uncompressed JSON already exceeds the datagram
/// ceiling, since compression cannot be relied on to shrink small or
/// already-dense payloads below it.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, TransportError> {
    let json = to_wire(packet).map_err(|_| TransportError::MalformedPacket)?;
    if json.len() > MAX_DATAGRAM_SIZE {
        return Err(TransportError::PayloadTooLarge(json.len(), MAX_DATAGRAM_SIZE));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|_| TransportError::MalformedPacket)?;
    encoder.finish().map_err(|_| TransportError::MalformedPacket)
}

/// Deserialize a datagram back into a packet. Any failure at the
/// decompression, UTF-8, or structured-decode stage collapses to
/// `MalformedPacket` — the caller's only correct response is to drop the
/// datagram silently (spec §7).
pub fn decode(bytes: &[u8]) -> Result<Packet, TransportError> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|_| TransportError::MalformedPacket)?;

    from_wire(&json).ok_or(TransportError::MalformedPacket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_decode_roundtrip() {
        let packet = Packet::Reliable {
            seq: 1,
            payload: json!({"type": "player_input", "frame": 10, "inputs": [1, 2, 3]}),
            timestamp: 1.0,
        };
        let bytes = encode(&packet).unwrap();
        assert_eq!(decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn encode_decode_roundtrip_unreliable() {
        let packet = Packet::Unreliable {
            payload: json!({"type": "heartbeat_ack"}),
            timestamp: 2.0,
        };
        let bytes = encode(&packet).unwrap();
        assert_eq!(decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn decode_garbage_is_malformed() {
        let garbage = [0xDE, 0xAD, 0xBE, 0xEF];
        assert!(matches!(decode(&garbage), Err(TransportError::MalformedPacket)));
    }

    #[test]
    fn decode_empty_is_malformed() {
        assert!(matches!(decode(&[]), Err(TransportError::MalformedPacket)));
    }

    #[test]
    fn encode_oversized_payload_rejected() {
        let huge = json!({"type": "blob", "data": "x".repeat(MAX_DATAGRAM_SIZE + 1)});
        let packet = Packet::Unreliable { payload: huge, timestamp: 0.0 };
        assert!(matches!(
            encode(&packet),
            Err(TransportError::PayloadTooLarge(_, _))
        ));
    }

    #[test]
    fn compression_actually_shrinks_repetitive_payloads() {
        let payload = json!({"type": "frame_inputs", "blob": "a".repeat(4096)});
        let packet = Packet::Unreliable { payload, timestamp: 0.0 };
        let bytes = encode(&packet).unwrap();
        assert!(bytes.len() < 4096);
    }
}
