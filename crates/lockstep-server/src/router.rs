use std::net::SocketAddr;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::AdmissionError;
use crate::room::Room;
use crate::scheduler::{broadcast_reliable, GameServer};

/// Dispatches a decoded inbound payload to the matching admission or
/// in-room handler (spec.md §4.3). Unknown `type`s are dropped silently.
impl GameServer {
    pub async fn handle_message(&mut self, addr: SocketAddr, payload: Value) {
        let Some(msg_type) = payload.get("type").and_then(Value::as_str) else {
            debug!("dropping message from {addr} with no type field");
            return;
        };

        match msg_type {
            "create_room" => self.handle_create_room(addr).await,
            "join_room" => self.handle_join_room(addr, &payload).await,
            "get_room_list" => self.handle_get_room_list(addr).await,
            "connect" => self.handle_connect(addr, &payload).await,
            "game_start" => self.handle_game_start(addr).await,
            "player_input" => self.handle_player_input(addr, &payload).await,
            "ping" => self.handle_ping(addr, &payload).await,
            "sync_request" => self.handle_sync_request(addr, &payload).await,
            other => debug!("ignoring unrecognized message type {other:?} from {addr}"),
        }
    }

    /// The transport observed `addr` go silent or close explicitly. Removes
    /// the player from their room, reassigns host if needed, and notifies
    /// the rest of the room (spec.md §4.4 "Disconnect during play").
    pub async fn handle_disconnect(&mut self, addr: SocketAddr) {
        let Some(room_id) = self.player_rooms.remove(&addr) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        let Some(player_id) = room.remove_player(addr) else {
            return;
        };
        info!("player {player_id} left room {room_id}");

        let payload = json!({ "type": "player_disconnect", "player_id": player_id });
        broadcast_reliable(&self.transport, room, payload).await;
    }

    async fn handle_create_room(&mut self, addr: SocketAddr) {
        let room_id = self.allocate_room_id();
        let mut room = Room::new(room_id.clone());
        room.host_addr = Some(addr);
        self.rooms.insert(room_id.clone(), room);

        info!("created room {room_id}, host {addr}");
        self.reply(addr, json!({ "type": "create_room_success", "room_id": room_id })).await;
    }

    async fn handle_join_room(&mut self, addr: SocketAddr, payload: &Value) {
        let Some(room_id) = payload.get("room_id").and_then(Value::as_str) else {
            return;
        };
        let name = payload.get("name").and_then(Value::as_str).map(str::to_owned);

        match self.admit(addr, room_id, name) {
            Ok(player_id) => {
                self.reply(
                    addr,
                    json!({ "type": "join_room_success", "player_id": player_id, "room_id": room_id }),
                )
                .await;
            }
            Err(e) => {
                self.reply(addr, json!({ "type": "join_room_failed", "reason": e.reason() })).await;
            }
        }
    }

    async fn handle_get_room_list(&mut self, addr: SocketAddr) {
        let rooms: Vec<Value> = self
            .rooms
            .values()
            .filter(|r| !r.started)
            .map(|r| json!({ "room_id": r.id, "player_count": r.player_count() }))
            .collect();
        self.reply(addr, json!({ "type": "room_list", "rooms": rooms })).await;
    }

    async fn handle_connect(&mut self, addr: SocketAddr, payload: &Value) {
        let Some(room_id) = payload.get("room_id").and_then(Value::as_str) else {
            return;
        };
        let name = payload.get("name").and_then(Value::as_str).map(str::to_owned);

        match self.admit(addr, room_id, name) {
            Ok(player_id) => {
                let room = self.rooms.get(room_id).expect("just admitted");
                let game_state = json!({
                    "frame": room.current_frame,
                    "game_started": room.started,
                });
                self.reply(
                    addr,
                    json!({
                        "type": "connect_success",
                        "player_id": player_id,
                        "room_id": room_id,
                        "game_state": game_state,
                    }),
                )
                .await;
            }
            Err(e) => {
                self.reply(addr, json!({ "type": "connect_failed", "reason": e.reason() })).await;
            }
        }
    }

    /// Shared admission path for `join_room` and `connect`.
    fn admit(
        &mut self,
        addr: SocketAddr,
        room_id: &str,
        name: Option<String>,
    ) -> Result<u32, AdmissionError> {
        let room = self.rooms.get_mut(room_id).ok_or(AdmissionError::RoomNotFound)?;
        let player_id = room.join(addr, name)?;
        self.player_rooms.insert(addr, room_id.to_string());
        info!("player {player_id} joined room {room_id} ({addr})");
        Ok(player_id)
    }

    async fn handle_game_start(&mut self, addr: SocketAddr) {
        let Some(room_id) = self.player_rooms.get(&addr).cloned() else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        if room.host_addr != Some(addr) || room.started {
            return;
        }
        room.start();

        let players: Value = room
            .players
            .values()
            .map(|p| {
                (
                    p.player_id.to_string(),
                    json!({ "id": p.player_id, "name": p.display_name, "color": p.color }),
                )
            })
            .collect::<serde_json::Map<_, _>>()
            .into();

        let payload = json!({ "type": "game_start", "start_frame": 0, "players": players });
        broadcast_reliable(&self.transport, room, payload).await;
        info!("room {room_id} game started");
    }

    async fn handle_player_input(&mut self, addr: SocketAddr, payload: &Value) {
        let Some(room_id) = self.player_rooms.get(&addr) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let Some(player) = room.players.get(&addr) else {
            return;
        };
        let player_id = player.player_id;

        let (Some(frame), Some(inputs)) = (
            payload.get("frame").and_then(Value::as_i64),
            payload.get("inputs").and_then(Value::as_array).cloned(),
        ) else {
            return;
        };

        if !room.accept_input(player_id, frame, inputs) {
            return;
        }

        let server_frame = room.current_frame;
        self.reply(
            addr,
            json!({
                "type": "input_ack",
                "frame": frame,
                "server_frame": server_frame,
                "player_id": player_id,
            }),
        )
        .await;
    }

    async fn handle_ping(&mut self, addr: SocketAddr, payload: &Value) {
        let Some(room_id) = self.player_rooms.get(&addr) else {
            return;
        };
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let Some(timestamp) = payload.get("timestamp").cloned() else {
            return;
        };

        self.reply(
            addr,
            json!({ "type": "pong", "timestamp": timestamp, "server_frame": room.current_frame }),
        )
        .await;
    }

    async fn handle_sync_request(&mut self, addr: SocketAddr, payload: &Value) {
        let Some(room_id) = self.player_rooms.get(&addr) else {
            return;
        };
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        if !room.players.contains_key(&addr) {
            return;
        }

        let requested_frame = payload.get("frame").and_then(Value::as_i64).unwrap_or(0);
        for frame in requested_frame..=room.current_frame {
            let Some(inputs) = room.committed_frames.get(&frame) else {
                continue;
            };
            self.reply(addr, json!({ "type": "frame_inputs", "frame": frame, "inputs": inputs }))
                .await;
        }
    }

    async fn reply(&self, addr: SocketAddr, payload: Value) {
        if let Err(e) = self.transport.send_reliable(addr, payload).await {
            warn!("failed to reply to {addr}: {e}");
        }
    }
}
