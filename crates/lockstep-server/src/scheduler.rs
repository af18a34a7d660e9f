use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use rod_transport::EndpointHandle;
use serde_json::{json, Value};
use tracing::info;

use crate::room::Room;

/// Owns every room and the player→room index, and drives the fixed-tick
/// commit loop (spec.md §4.4 Scheduler). Mirrors the teacher's
/// `ConnectionHandler` in shape: a single struct owned by one task,
/// ticked from the same `tokio::select!` that feeds it inbound events.
pub struct GameServer {
    pub(crate) rooms: HashMap<String, Room>,
    pub(crate) player_rooms: HashMap<SocketAddr, String>,
    pub(crate) transport: EndpointHandle,
    room_gc: Duration,
    next_room_seq: u64,
}

impl GameServer {
    pub fn new(transport: EndpointHandle, room_gc: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            player_rooms: HashMap::new(),
            transport,
            room_gc,
            next_room_seq: 0,
        }
    }

    pub(crate) fn allocate_room_id(&mut self) -> String {
        self.next_room_seq += 1;
        format!("room_{}", self.next_room_seq)
    }

    /// Look up a room by id, for introspection/tests.
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// One pass over every room: commit due frames and broadcast them,
    /// then GC rooms that have sat empty past the grace period.
    pub async fn tick(&mut self) {
        let mut expired = Vec::new();

        for (room_id, room) in self.rooms.iter_mut() {
            if room.player_count() == 0 {
                if let Some(since) = room.empty_since {
                    if since.elapsed() >= self.room_gc {
                        expired.push(room_id.clone());
                        continue;
                    }
                }
            }

            if !room.started {
                continue;
            }

            for (frame, inputs) in room.tick() {
                let payload = json!({
                    "type": "frame_inputs",
                    "frame": frame,
                    "inputs": inputs,
                });
                broadcast_reliable(&self.transport, room, payload).await;
            }
        }

        for room_id in expired {
            self.rooms.remove(&room_id);
            self.player_rooms.retain(|_, r| r != &room_id);
            info!("room {room_id} destroyed after sitting empty for {:?}", self.room_gc);
        }
    }
}

/// Reliably send `payload` to every current member of `room`. Standalone so
/// the caller can hold a `&mut Room` borrowed from `self.rooms` alongside
/// `&self.transport` without the two aliasing.
pub(crate) async fn broadcast_reliable(transport: &EndpointHandle, room: &Room, payload: Value) {
    for &addr in room.players.keys() {
        let _ = transport.send_reliable(addr, payload.clone()).await;
    }
}
