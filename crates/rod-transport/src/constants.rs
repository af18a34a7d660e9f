use std::time::Duration;

/// Maximum UDP datagram size a sender will produce; matches the practical
/// IPv4 UDP payload ceiling rather than any link MTU.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Size of the socket receive buffer.
pub const RECV_BUF_SIZE: usize = 65_536;

/// How often the maintenance loop scans `unacked` for retransmits, sends
/// heartbeats, and reaps inactive peers.
pub const MAINTENANCE_TICK: Duration = Duration::from_millis(10);

/// A reliable packet is retransmitted once this much time has passed since
/// it was last sent without being ACKed.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Number of retransmits allowed before a packet is given up on.
pub const MAX_RETRIES: u32 = 10;

/// How often an idle peer is sent a heartbeat probe.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1_000);

/// A peer that has sent nothing for this long is considered disconnected.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Width of the sliding window used to bound the reorder buffer and the
/// inbound dedup set. Half of this must stay well under 2^15 so the signed
/// wraparound comparison in `seq` remains unambiguous.
pub const SEQ_WINDOW: u16 = 1024;
