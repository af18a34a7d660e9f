use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::constants::{
    HEARTBEAT_INTERVAL, INACTIVITY_TIMEOUT, MAINTENANCE_TICK, MAX_RETRIES, RECV_BUF_SIZE,
    RETRANSMIT_INTERVAL,
};
use crate::error::TransportError;
use crate::packet::Packet;
use crate::peer::PeerState;
use crate::{codec, now_timestamp};

/// Runtime-tunable reliability timings. Defaults match spec.md §4.2;
/// overridden from the server's `server.toml` in the ambient config layer.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub maintenance_tick: Duration,
    pub retransmit_interval: Duration,
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    pub inactivity_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            maintenance_tick: MAINTENANCE_TICK,
            retransmit_interval: RETRANSMIT_INTERVAL,
            max_retries: MAX_RETRIES,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            inactivity_timeout: INACTIVITY_TIMEOUT,
        }
    }
}

/// Whether an `Endpoint` behaves as a server (peers are created implicitly
/// on first inbound datagram) or a client (peers must be registered with
/// `connect` before a reliable send is accepted — spec §4.2, `PeerUnknown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Server,
    Client,
}

/// Upward events a consumer of the transport observes.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    /// A payload delivered in strictly ascending per-peer order.
    Message { addr: SocketAddr, payload: Value },
    /// The peer was removed due to inactivity or explicit teardown.
    Disconnected { addr: SocketAddr },
    /// A reliable packet exceeded its retry budget and was given up on.
    SendFailed { addr: SocketAddr, seq: u16 },
}

enum EndpointCommand {
    SendReliable {
        addr: SocketAddr,
        payload: Value,
        reply: oneshot::Sender<Result<u16, TransportError>>,
    },
    SendUnreliable {
        addr: SocketAddr,
        payload: Value,
    },
    Connect {
        addr: SocketAddr,
    },
    Close {
        addr: SocketAddr,
    },
}

/// A cloneable handle for issuing sends from any task, mirroring the
/// teacher's `ServerHandle` pattern.
#[derive(Clone)]
pub struct EndpointHandle {
    command_tx: mpsc::Sender<EndpointCommand>,
}

impl EndpointHandle {
    /// Send a reliable payload to `addr`, returning the sequence number
    /// assigned to it. Fails with `PeerUnknown` on a client-mode endpoint
    /// that has not registered `addr` via `connect`.
    pub async fn send_reliable(
        &self,
        addr: SocketAddr,
        payload: Value,
    ) -> Result<u16, TransportError> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .command_tx
            .send(EndpointCommand::SendReliable { addr, payload, reply })
            .await;
        rx.await.unwrap_or(Err(TransportError::PeerUnknown(addr)))
    }

    /// Send a fire-and-forget payload with no bookkeeping.
    pub async fn send_unreliable(&self, addr: SocketAddr, payload: Value) {
        let _ = self
            .command_tx
            .send(EndpointCommand::SendUnreliable { addr, payload })
            .await;
    }

    /// Register `addr` as a tracked peer ahead of the first send. Required
    /// on client-mode endpoints before `send_reliable` will succeed.
    pub async fn connect(&self, addr: SocketAddr) {
        let _ = self.command_tx.send(EndpointCommand::Connect { addr }).await;
    }

    /// Explicitly tear down a peer, firing `Disconnected` as if its
    /// inactivity timeout had elapsed.
    pub async fn close(&self, addr: SocketAddr) {
        let _ = self.command_tx.send(EndpointCommand::Close { addr }).await;
    }
}

/// Owns the socket and every peer's reliability state. Runs the
/// socket-receive loop, the 100 Hz retransmit/heartbeat/timeout
/// maintenance pass, and dispatches inbound commands — the three
/// concurrent activities of §5, unified here in one task via
/// `tokio::select!` in the teacher's idiom.
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    role: EndpointRole,
    config: EndpointConfig,
    peers: HashMap<SocketAddr, PeerState>,
    event_tx: mpsc::Sender<EndpointEvent>,
    command_rx: mpsc::Receiver<EndpointCommand>,
}

impl Endpoint {
    pub async fn bind(
        addr: SocketAddr,
        role: EndpointRole,
        config: EndpointConfig,
    ) -> Result<(Self, mpsc::Receiver<EndpointEvent>, EndpointHandle), TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(1024);

        tracing::info!("transport endpoint bound on {addr} ({role:?})");

        Ok((
            Self {
                socket: Arc::new(socket),
                role,
                config,
                peers: HashMap::new(),
                event_tx,
                command_rx,
            },
            event_rx,
            EndpointHandle { command_tx },
        ))
    }

    /// Run until `shutdown` signals true. The only blocking operation is
    /// the socket recv, bounded implicitly by `tokio::select!` racing it
    /// against the maintenance tick so the tick always runs on schedule.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut recv_buf = vec![0u8; RECV_BUF_SIZE];
        let mut maintenance = tokio::time::interval(self.config.maintenance_tick);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut recv_buf) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&recv_buf[..len], addr).await,
                        Err(e) => warn!("UDP recv error: {e}"),
                    }
                }
                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = maintenance.tick() => {
                    self.run_maintenance().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("transport endpoint shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: EndpointCommand) {
        match cmd {
            EndpointCommand::SendReliable { addr, payload, reply } => {
                let result = self.send_reliable_to(addr, payload).await;
                let _ = reply.send(result);
            }
            EndpointCommand::SendUnreliable { addr, payload } => {
                self.send_unreliable_to(addr, payload).await;
            }
            EndpointCommand::Connect { addr } => {
                self.peers.entry(addr).or_insert_with(|| PeerState::new(addr, Instant::now()));
            }
            EndpointCommand::Close { addr } => {
                if self.peers.remove(&addr).is_some() {
                    let _ = self.event_tx.send(EndpointEvent::Disconnected { addr }).await;
                }
            }
        }
    }

    async fn send_reliable_to(
        &mut self,
        addr: SocketAddr,
        payload: Value,
    ) -> Result<u16, TransportError> {
        if !self.peers.contains_key(&addr) {
            if self.role == EndpointRole::Client {
                return Err(TransportError::PeerUnknown(addr));
            }
            self.peers.insert(addr, PeerState::new(addr, Instant::now()));
        }

        let now = Instant::now();
        let peer = self.peers.get_mut(&addr).expect("just inserted or present");
        let seq = peer.begin_send(payload.clone(), now);

        let packet = Packet::Reliable { seq, payload, timestamp: now_timestamp() };
        self.transmit(&packet, addr).await;
        Ok(seq)
    }

    async fn send_unreliable_to(&mut self, addr: SocketAddr, payload: Value) {
        let packet = Packet::Unreliable { payload, timestamp: now_timestamp() };
        self.transmit(&packet, addr).await;
    }

    async fn transmit(&self, packet: &Packet, addr: SocketAddr) {
        match codec::encode(packet) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, addr).await {
                    warn!("send to {addr} failed: {e}");
                }
            }
            Err(e) => warn!("failed to encode outbound packet to {addr}: {e}"),
        }
    }

    async fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        let packet = match codec::decode(data) {
            Ok(p) => p,
            Err(_) => {
                trace!("dropping malformed datagram from {addr}");
                return;
            }
        };

        let now = Instant::now();
        if self.role == EndpointRole::Server && !self.peers.contains_key(&addr) {
            debug!("new peer {addr}");
            self.peers.insert(addr, PeerState::new(addr, now));
        }

        let Some(peer) = self.peers.get_mut(&addr) else {
            trace!("datagram from untracked peer {addr}, dropping");
            return;
        };
        peer.touch_activity(now);

        match packet {
            Packet::Reliable { seq, payload, .. } => {
                self.transmit(&Packet::Ack { ack_seq: seq, timestamp: now_timestamp() }, addr)
                    .await;
                let peer = self.peers.get_mut(&addr).expect("present");
                let delivered = peer.receive_reliable(seq, payload);
                for payload in delivered {
                    let _ = self.event_tx.send(EndpointEvent::Message { addr, payload }).await;
                }
            }
            Packet::Unreliable { payload, .. } => {
                let _ = self.event_tx.send(EndpointEvent::Message { addr, payload }).await;
            }
            Packet::Ack { ack_seq, .. } => {
                peer.acknowledge(ack_seq);
            }
            Packet::Heartbeat { .. } => {
                if self.role == EndpointRole::Server {
                    self.send_unreliable_to(
                        addr,
                        serde_json::json!({"type": "heartbeat_ack"}),
                    )
                    .await;
                }
            }
        }
    }

    async fn run_maintenance(&mut self) {
        let now = Instant::now();
        let mut to_send: Vec<(SocketAddr, Packet)> = Vec::new();
        let mut failed: Vec<(SocketAddr, u16)> = Vec::new();
        let mut disconnected: Vec<SocketAddr> = Vec::new();

        for (&addr, peer) in self.peers.iter_mut() {
            let (resend, exhausted) = peer.due_retransmits(
                now,
                self.config.retransmit_interval,
                self.config.max_retries,
            );
            for (seq, payload) in resend {
                to_send.push((addr, Packet::Reliable { seq, payload, timestamp: now_timestamp() }));
            }
            for seq in exhausted {
                failed.push((addr, seq));
            }

            if peer.should_heartbeat(now, self.config.heartbeat_interval) {
                to_send.push((addr, Packet::Heartbeat { timestamp: now_timestamp() }));
                peer.last_heartbeat_sent = now;
            }

            if peer.is_inactive(now, self.config.inactivity_timeout) {
                disconnected.push(addr);
            }
        }

        for (addr, packet) in to_send {
            self.transmit(&packet, addr).await;
        }
        for (addr, seq) in failed {
            let _ = self.event_tx.send(EndpointEvent::SendFailed { addr, seq }).await;
        }
        for addr in disconnected {
            self.peers.remove(&addr);
            debug!("peer {addr} timed out");
            let _ = self.event_tx.send(EndpointEvent::Disconnected { addr }).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::watch;

    async fn spawn(role: EndpointRole) -> (EndpointHandle, mpsc::Receiver<EndpointEvent>, watch::Sender<bool>) {
        let (mut endpoint, events, handle) =
            Endpoint::bind("127.0.0.1:0".parse().unwrap(), role, EndpointConfig::default())
                .await
                .unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move { endpoint.run(shutdown_rx).await });
        (handle, events, shutdown_tx)
    }

    async fn spawn_with_addr(
        role: EndpointRole,
    ) -> (SocketAddr, EndpointHandle, mpsc::Receiver<EndpointEvent>, watch::Sender<bool>) {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        drop(socket);
        let (mut endpoint, events, handle) =
            Endpoint::bind(addr, role, EndpointConfig::default()).await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move { endpoint.run(shutdown_rx).await });
        (addr, handle, events, shutdown_tx)
    }

    #[tokio::test]
    async fn unreliable_roundtrip_between_two_endpoints() {
        let (server_addr, _server_handle, mut server_events, _server_shutdown) =
            spawn_with_addr(EndpointRole::Server).await;
        let (_client_addr, client_handle, _client_events, _client_shutdown) =
            spawn_with_addr(EndpointRole::Client).await;

        client_handle.send_unreliable(server_addr, json!({"ping": 1})).await;

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), server_events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        match event {
            EndpointEvent::Message { payload, .. } => assert_eq!(payload, json!({"ping": 1})),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn reliable_send_is_acked_and_delivered_once() {
        let (server_addr, _server_handle, mut server_events, _server_shutdown) =
            spawn_with_addr(EndpointRole::Server).await;
        let (_client_addr, client_handle, _client_events, _client_shutdown) =
            spawn_with_addr(EndpointRole::Client).await;

        client_handle.connect(server_addr).await;
        let seq = client_handle
            .send_reliable(server_addr, json!({"type": "ping"}))
            .await
            .expect("client is connected");
        assert_eq!(seq, 0);

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), server_events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert!(matches!(event, EndpointEvent::Message { .. }));
    }

    #[tokio::test]
    async fn client_mode_reliable_send_to_unconnected_peer_fails() {
        let (client_handle, _events, _shutdown) = spawn(EndpointRole::Client).await;
        let unconnected: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = client_handle.send_reliable(unconnected, json!({})).await;
        assert!(matches!(result, Err(TransportError::PeerUnknown(_))));
    }
}
