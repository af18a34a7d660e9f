use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decompression, UTF-8, or structured decode failed. The caller drops
    /// the datagram silently; this variant exists for the few call sites
    /// (tests, metrics) that want to observe it.
    #[error("malformed packet")]
    MalformedPacket,

    /// A send was attempted with a payload larger than the MTU budget.
    #[error("payload of {0} bytes exceeds the {1}-byte datagram limit")]
    PayloadTooLarge(usize, usize),

    /// `send_reliable` was called for an address with no tracked peer on a
    /// client-mode endpoint.
    #[error("no tracked peer for {0}")]
    PeerUnknown(std::net::SocketAddr),
}
