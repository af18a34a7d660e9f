//! Reliable ordered datagram transport coexisting with unreliable
//! fire-and-forget delivery on a single UDP socket.

pub mod codec;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod packet;
pub mod peer;
pub mod seq;

pub use endpoint::{Endpoint, EndpointConfig, EndpointEvent, EndpointHandle, EndpointRole};
pub use error::TransportError;
pub use packet::Packet;

/// Wall-clock timestamp for the wire-level `timestamp` field, seconds
/// since the Unix epoch as a float, matching the original JSON schema.
pub(crate) fn now_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
