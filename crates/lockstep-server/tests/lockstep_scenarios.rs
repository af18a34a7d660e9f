use std::net::SocketAddr;

use lockstep_server::room::{JoinError, Room};
use serde_json::json;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// S1 — Two-player empty-input commit. Neither player submits frame 7;
/// once `current_frame` reaches 10 the offset-3 pass seals it with empty
/// inputs for both.
#[test]
fn s1_two_player_empty_input_commit() {
    let mut room = Room::new("room_1".into());
    room.join(addr(1), Some("p1".into())).unwrap();
    room.join(addr(2), Some("p2".into())).unwrap();
    room.start();
    room.current_frame = 10;

    let committed = room.tick();
    let (frame, inputs) = committed.into_iter().find(|(f, _)| *f == 7).expect("frame 7 committed");
    assert_eq!(frame, 7);
    assert_eq!(inputs.len(), 2);
    assert!(inputs.values().all(Vec::is_empty));
    assert_eq!(room.committed_frames[&7], inputs);
}

/// S4 — Host departure. The host (player 1) disconnects; host reassigns to
/// the lowest remaining player_id (player 2). A subsequent `game_start`
/// precondition check (addr == host_addr) now passes for player 2 and
/// fails for player 3.
#[test]
fn s4_host_departure_reassigns_to_lowest_remaining_player_id() {
    let mut room = Room::new("room_1".into());
    room.join(addr(1), Some("host".into())).unwrap();
    room.join(addr(2), Some("p2".into())).unwrap();
    room.join(addr(3), Some("p3".into())).unwrap();
    assert_eq!(room.host_addr, Some(addr(1)));

    room.remove_player(addr(1));

    assert_eq!(room.host_addr, Some(addr(2)));
    assert_ne!(room.host_addr, Some(addr(3)));
}

/// S5 — Late input rejected. With `current_frame = 20`, an input for frame
/// 16 (four frames behind) is outside the acceptance window and discarded;
/// an already-committed frame's contents don't change either.
#[test]
fn s5_late_input_rejected_and_committed_frame_immutable() {
    let mut room = Room::new("room_1".into());
    room.join(addr(1), Some("p1".into())).unwrap();
    room.current_frame = 20;
    room.committed_frames.insert(16, [(1, vec![])].into_iter().collect());

    let accepted = room.accept_input(1, 16, vec![json!("X")]);

    assert!(!accepted);
    assert_eq!(room.committed_frames[&16].get(&1), Some(&Vec::new()));
}

/// S6 — Room GC timer. An empty room's `empty_since` is cleared by any
/// join, and only a room that has stayed empty continuously for the full
/// grace period is eligible for GC (checked here at the `Room` level; the
/// elapsed-time comparison itself is exercised by `Scheduler::tick`).
#[test]
fn s6_join_resets_empty_since() {
    let mut room = Room::new("room_1".into());
    room.join(addr(1), Some("p1".into())).unwrap();
    room.remove_player(addr(1));
    assert!(room.empty_since.is_some());

    room.join(addr(2), Some("p2".into())).unwrap();
    assert!(room.empty_since.is_none());
}

/// Boundary behavior: frame exactly `current_frame - 3` is accepted, one
/// frame further behind is rejected.
#[test]
fn boundary_acceptance_window_edges() {
    let mut room = Room::new("room_1".into());
    room.join(addr(1), Some("p1".into())).unwrap();
    room.current_frame = 10;

    assert!(room.accept_input(1, 7, vec![json!("ok")]));
    assert!(!room.accept_input(1, 6, vec![json!("too-late")]));
    assert!(room.accept_input(1, 13, vec![json!("ok")]));
    assert!(!room.accept_input(1, 14, vec![json!("too-early")]));
}

/// Commit monotonicity: across many ticks with every player always
/// submitting, `committed_frames` keys form a gap-free ascending prefix.
#[test]
fn commit_monotonicity_holds_across_many_ticks() {
    let mut room = Room::new("room_1".into());
    room.join(addr(1), Some("p1".into())).unwrap();
    room.join(addr(2), Some("p2".into())).unwrap();
    room.start();

    for _ in 0..50 {
        let frame = room.current_frame;
        room.accept_input(1, frame, vec![]);
        room.accept_input(2, frame, vec![]);
        room.tick();
    }

    let mut frames: Vec<i64> = room.committed_frames.keys().copied().collect();
    frames.sort_unstable();
    for window in frames.windows(2) {
        assert_eq!(window[1], window[0] + 1, "committed frames must be a gap-free ascending run");
    }
}

/// Joining a started room is rejected; joining before start is admitted.
#[test]
fn join_after_game_start_is_rejected() {
    let mut room = Room::new("room_1".into());
    room.join(addr(1), Some("p1".into())).unwrap();
    room.start();

    let result = room.join(addr(2), Some("late".into()));
    assert!(matches!(result, Err(JoinError::Started)));
}
