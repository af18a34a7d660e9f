use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use serde_json::Value;

use crate::constants::SEQ_WINDOW;
use crate::seq::seq_diff;

/// An outbound reliable packet awaiting acknowledgement.
#[derive(Debug, Clone)]
pub(crate) struct UnackedEntry {
    pub payload: Value,
    pub first_send: Instant,
    pub last_send: Instant,
    pub retry_count: u32,
}

/// Per-remote-address reliability bookkeeping (spec §3). One `PeerState`
/// exists per tracked remote address, owned exclusively by the `Endpoint`
/// that created it — this is the serialization domain §5 calls for.
pub struct PeerState {
    pub addr: SocketAddr,
    next_seq: u16,
    pub(crate) unacked: BTreeMap<u16, UnackedEntry>,
    received_seqs: HashSet<u16>,
    expected_seq: u16,
    reorder_buffer: BTreeMap<u16, Value>,
    pub last_activity: Instant,
    pub last_heartbeat_sent: Instant,
}

impl PeerState {
    pub fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            next_seq: 0,
            unacked: BTreeMap::new(),
            received_seqs: HashSet::new(),
            expected_seq: 0,
            reorder_buffer: BTreeMap::new(),
            last_activity: now,
            last_heartbeat_sent: now,
        }
    }

    /// Allocate the next outbound sequence number and start tracking it as
    /// unacknowledged.
    pub fn begin_send(&mut self, payload: Value, now: Instant) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.unacked.insert(
            seq,
            UnackedEntry {
                payload,
                first_send: now,
                last_send: now,
                retry_count: 0,
            },
        );
        seq
    }

    /// Cancel a specific outbound reliable packet. Absence is not an error
    /// (late duplicate ACK).
    pub fn acknowledge(&mut self, ack_seq: u16) {
        self.unacked.remove(&ack_seq);
    }

    /// Entries due for retransmission at `now`, bumping their retry count
    /// and `last_send`. Entries that have exceeded the retry budget are
    /// evicted and returned separately so the caller can surface
    /// `RetryExhausted`.
    pub fn due_retransmits(
        &mut self,
        now: Instant,
        retransmit_after: std::time::Duration,
        max_retries: u32,
    ) -> (Vec<(u16, Value)>, Vec<u16>) {
        let mut to_resend = Vec::new();
        let mut exhausted = Vec::new();

        for (&seq, entry) in self.unacked.iter_mut() {
            if now.duration_since(entry.last_send) < retransmit_after {
                continue;
            }
            entry.retry_count += 1;
            entry.last_send = now;
            if entry.retry_count > max_retries {
                exhausted.push(seq);
            } else {
                to_resend.push((seq, entry.payload.clone()));
            }
        }

        for seq in &exhausted {
            self.unacked.remove(seq);
        }

        (to_resend, exhausted)
    }

    /// Handle an inbound `RELIABLE(seq)`. Returns payloads now deliverable
    /// upstream, in strictly ascending order. The caller is responsible for
    /// sending the ACK regardless of what this returns (spec §4.2 step 1).
    pub fn receive_reliable(&mut self, seq: u16, payload: Value) -> Vec<Value> {
        if self.received_seqs.contains(&seq) {
            return Vec::new();
        }

        // Seqs far enough behind the delivery cursor can never be delivered
        // (already passed) or are outside the bounded reorder window; track
        // them as seen so a straggling retransmit doesn't reprocess them,
        // but don't let the dedup set grow without bound.
        self.received_seqs.insert(seq);
        self.reorder_buffer.insert(seq, payload);
        self.prune_window();

        let mut delivered = Vec::new();
        while let Some(next) = self.reorder_buffer.remove(&self.expected_seq) {
            delivered.push(next);
            self.expected_seq = self.expected_seq.wrapping_add(1);
        }
        delivered
    }

    /// Drop any buffered/seen seqs that have fallen outside the sliding
    /// window behind `expected_seq`, bounding memory use under sustained
    /// reordering or a stalled sender.
    fn prune_window(&mut self) {
        let expected = self.expected_seq;
        // Every buffered seq is ahead of `expected` (the in-order prefix is
        // popped eagerly on insert); drop anything that has drifted further
        // ahead than the window, which bounds memory under a sender that
        // races far past what the receiver can reassemble.
        self.reorder_buffer
            .retain(|&seq, _| seq_diff(seq, expected) < SEQ_WINDOW as i32);
        if self.received_seqs.len() > (SEQ_WINDOW as usize) * 4 {
            self.received_seqs
                .retain(|&seq| seq_diff(seq, expected).unsigned_abs() < SEQ_WINDOW as u32 * 2);
        }
    }

    pub fn touch_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_inactive(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.duration_since(self.last_activity) > timeout
    }

    pub fn should_heartbeat(&self, now: Instant, interval: std::time::Duration) -> bool {
        now.duration_since(self.last_heartbeat_sent) >= interval
    }

    #[cfg(test)]
    pub(crate) fn seed_expected_seq(&mut self, seq: u16) {
        self.expected_seq = seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn in_order_delivery() {
        let mut peer = PeerState::new(addr(), Instant::now());
        let out = peer.receive_reliable(0, json!(0));
        assert_eq!(out, vec![json!(0)]);
    }

    #[test]
    fn out_of_order_then_fills_gap() {
        let mut peer = PeerState::new(addr(), Instant::now());
        assert!(peer.receive_reliable(2, json!(2)).is_empty());
        // seq 0 arriving delivers 0 only; 2 stays buffered until 1 arrives.
        assert_eq!(peer.receive_reliable(0, json!(0)), vec![json!(0)]);
        let out1 = peer.receive_reliable(1, json!(1));
        assert_eq!(out1, vec![json!(1), json!(2)]);
    }

    #[test]
    fn duplicate_is_dropped() {
        let mut peer = PeerState::new(addr(), Instant::now());
        assert_eq!(peer.receive_reliable(0, json!(0)), vec![json!(0)]);
        assert!(peer.receive_reliable(0, json!(0)).is_empty());
    }

    #[test]
    fn seq_wraps_without_stalling() {
        let mut peer = PeerState::new(addr(), Instant::now());
        peer.seed_expected_seq(65534);
        for seq in [65534u16, 65535u16, 0u16, 1u16] {
            let out = peer.receive_reliable(seq, json!(seq));
            assert_eq!(out, vec![json!(seq)], "seq {seq} should deliver immediately across the wrap");
        }
    }

    #[test]
    fn ack_removes_unacked_entry() {
        let mut peer = PeerState::new(addr(), Instant::now());
        let seq = peer.begin_send(json!("hello"), Instant::now());
        assert!(peer.unacked.contains_key(&seq));
        peer.acknowledge(seq);
        assert!(!peer.unacked.contains_key(&seq));
    }

    #[test]
    fn late_duplicate_ack_is_not_an_error() {
        let mut peer = PeerState::new(addr(), Instant::now());
        peer.acknowledge(999); // never sent, must not panic
    }

    #[test]
    fn retransmit_after_timeout_then_exhausts() {
        let mut peer = PeerState::new(addr(), Instant::now());
        let start = Instant::now();
        let seq = peer.begin_send(json!(1), start);

        let mut now = start;
        for expected_retry in 1..=10 {
            now += Duration::from_millis(101);
            let (resend, exhausted) = peer.due_retransmits(now, Duration::from_millis(100), 10);
            assert_eq!(resend.len(), 1);
            assert!(exhausted.is_empty());
            assert_eq!(peer.unacked[&seq].retry_count, expected_retry);
        }

        now += Duration::from_millis(101);
        let (resend, exhausted) = peer.due_retransmits(now, Duration::from_millis(100), 10);
        assert!(resend.is_empty());
        assert_eq!(exhausted, vec![seq]);
        assert!(peer.unacked.is_empty());
    }
}
