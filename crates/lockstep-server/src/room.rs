use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;

/// 1-based, assigned in join order; stable for the life of a player's
/// membership (spec.md §3 Room).
pub type PlayerId = u32;

/// How far behind/ahead of `current_frame` an input may still be buffered.
pub const ACCEPTANCE_WINDOW: i64 = 3;

/// How long a committed frame's pending-input bucket is kept around before
/// the scheduler's per-tick GC drops it.
pub const PENDING_INPUT_RETENTION: i64 = 60;

/// Grace period an empty room is kept alive before `Scheduler` destroys it.
pub const EMPTY_ROOM_GC: std::time::Duration = std::time::Duration::from_secs(60);

fn colorize(player_id: PlayerId) -> [u8; 3] {
    const PALETTE: [[u8; 3]; 4] = [
        [0, 120, 255],
        [255, 0, 0],
        [0, 200, 0],
        [255, 255, 0],
    ];
    PALETTE[(player_id as usize) % PALETTE.len()]
}

#[derive(Debug, Clone)]
pub struct Player {
    pub player_id: PlayerId,
    pub display_name: String,
    pub color: [u8; 3],
    pub last_input_frame: i64,
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("game already started")]
    Started,
    #[error("already in room")]
    AlreadyInRoom,
}

pub type FrameInputs = BTreeMap<PlayerId, Vec<Value>>;

/// Per-room lockstep state (spec.md §3/§4.4). Owned exclusively by
/// whichever task holds the `RoomRegistry` — no internal locking.
pub struct Room {
    pub id: String,
    pub players: BTreeMap<SocketAddr, Player>,
    pub host_addr: Option<SocketAddr>,
    pub started: bool,
    pub current_frame: i64,
    pub pending_inputs: BTreeMap<i64, FrameInputs>,
    pub committed_frames: BTreeMap<i64, FrameInputs>,
    pub empty_since: Option<Instant>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            players: BTreeMap::new(),
            host_addr: None,
            started: false,
            current_frame: 0,
            pending_inputs: BTreeMap::new(),
            committed_frames: BTreeMap::new(),
            empty_since: None,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Admit `addr` as a new player. Mirrors `join_room`/`connect`'s shared
    /// admission rule from spec.md §4.3.
    pub fn join(&mut self, addr: SocketAddr, name: Option<String>) -> Result<PlayerId, JoinError> {
        if self.started {
            return Err(JoinError::Started);
        }
        if self.players.contains_key(&addr) {
            return Err(JoinError::AlreadyInRoom);
        }

        let player_id = self.players.len() as PlayerId + 1;
        if self.players.is_empty() {
            self.host_addr = Some(addr);
        }
        self.players.insert(
            addr,
            Player {
                player_id,
                display_name: name.unwrap_or_else(|| format!("Player{player_id}")),
                color: colorize(player_id),
                last_input_frame: 0,
            },
        );
        self.empty_since = None;
        Ok(player_id)
    }

    /// Latch `started`. Caller has already verified `addr == host_addr`.
    pub fn start(&mut self) {
        self.started = true;
        self.current_frame = 0;
    }

    /// Remove `addr`, reassigning host to the lowest remaining player_id if
    /// it was the host. Returns the departed player's id, if any.
    ///
    /// If this empties the room while a game was in progress, resets
    /// `started`/`current_frame`/the input buffers — the original
    /// implementation's empty-room reset, distinct from GC of an
    /// already-empty room (SPEC_FULL's "room reset-on-empty-during-play").
    pub fn remove_player(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        let departed = self.players.remove(&addr)?;
        let was_host = self.host_addr == Some(addr);

        if was_host {
            self.host_addr = self
                .players
                .iter()
                .min_by_key(|(_, p)| p.player_id)
                .map(|(&a, _)| a);
        }

        if self.players.is_empty() {
            if self.started {
                self.started = false;
                self.current_frame = 0;
                self.pending_inputs.clear();
                self.committed_frames.clear();
            }
            self.empty_since = Some(Instant::now());
        }

        Some(departed.player_id)
    }

    /// Accept a `player_input` iff `frame` is within the acceptance window
    /// and not already committed. Returns whether it was accepted.
    pub fn accept_input(&mut self, player_id: PlayerId, frame: i64, inputs: Vec<Value>) -> bool {
        if frame < self.current_frame - ACCEPTANCE_WINDOW
            || frame > self.current_frame + ACCEPTANCE_WINDOW
        {
            return false;
        }
        if self.committed_frames.contains_key(&frame) {
            return false;
        }

        self.pending_inputs.entry(frame).or_default().insert(player_id, inputs);
        if let Some(player) = self.players.values_mut().find(|p| p.player_id == player_id) {
            player.last_input_frame = frame;
        }
        true
    }

    /// Run the commit rule for one scheduler tick (spec.md §4.4). Returns
    /// the frames newly committed, in ascending order, for the caller to
    /// broadcast.
    pub fn tick(&mut self) -> Vec<(i64, FrameInputs)> {
        let mut committed = Vec::new();
        let current_ids: BTreeSet<PlayerId> =
            self.players.values().map(|p| p.player_id).collect();

        for offset in [3i64, 2, 1] {
            let target = self.current_frame - offset;
            if target < 0 || self.committed_frames.contains_key(&target) {
                continue;
            }

            if offset == 3 {
                let bucket = self.pending_inputs.entry(target).or_default();
                for &player_id in &current_ids {
                    bucket.entry(player_id).or_default();
                }
            }

            let submitted: BTreeSet<PlayerId> = self
                .pending_inputs
                .get(&target)
                .map(|bucket| bucket.keys().copied().collect())
                .unwrap_or_default();

            if submitted == current_ids {
                let frame_inputs = self.pending_inputs.remove(&target).unwrap_or_default();
                self.committed_frames.insert(target, frame_inputs.clone());
                committed.push((target, frame_inputs));
            } else {
                break;
            }
        }

        self.current_frame += 1;
        let retain_from = self.current_frame - PENDING_INPUT_RETENTION;
        self.pending_inputs.retain(|&frame, _| frame >= retain_from);

        committed
    }
}
