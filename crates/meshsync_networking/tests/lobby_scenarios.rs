//! # Lobby Scenarios
//!
//! End-to-end runs of several sessions on the loopback mesh:
//!
//! 1. **Three peers**: blame, blamelock and leader exemption, then convergence
//! 2. **Two peers**: the leader is never exempt
//! 3. **Lossy mesh**: retries and repeated asks still converge
//! 4. **Departures**: state of a departed peer is dropped and stays dropped
//!
//! Run with: cargo test --test lobby_scenarios -- --nocapture

use meshsync_core::RecordField;
use meshsync_networking::{
    Delivery, LocalLobby, MeshEvent, MeshTransport, Message, NetworkConditions, PeerId, PeerRole,
    SessionConfig, SyncError, SyncSummary,
};

const DT: f64 = 0.1;

/// Transport for feeding a session events by hand.
struct NullTransport;

impl MeshTransport for NullTransport {
    fn send(&mut self, _to: &PeerId, _delivery: Delivery, _data: &[u8]) {}

    fn broadcast(&mut self, _delivery: Delivery, _data: &[u8]) {}

    fn connected_peers(&self) -> Vec<PeerId> {
        Vec::new()
    }

    fn leader(&self) -> Option<PeerId> {
        None
    }
}

/// Joins `ids` in order (the first is the leader) and seeds each pool with
/// `records[i]` records before the handshake runs.
fn lobby(conditions: NetworkConditions, ids: &[&str], records: &[usize]) -> LocalLobby {
    let mut lobby = LocalLobby::new(conditions);
    for (i, id) in ids.iter().enumerate() {
        let config = SessionConfig {
            creator: i == 0,
            ..SessionConfig::named(*id)
        };
        lobby.join(id, config).unwrap();
    }
    for (i, &count) in records.iter().enumerate() {
        for _ in 0..count {
            lobby.session_mut(i).pool_mut().allocate().unwrap();
        }
    }
    lobby.pump();
    lobby
}

fn any_blamelock(lobby: &LocalLobby) -> bool {
    lobby.sessions().any(|s| s.blamelock())
}

// ============================================================================
// THREE PEERS: BLAME, BLAMELOCK, EXEMPTION
// ============================================================================

#[test]
fn three_peers_blame_then_exempt_leader() {
    let mut lobby = lobby(NetworkConditions::PERFECT, &["a", "b", "c"], &[5, 3, 3]);
    let a = PeerId::from("a");

    // Handshake complete: everyone knows everyone's neighbors.
    for session in lobby.sessions() {
        assert_eq!(session.peers().len(), 3);
        assert!(session.peers().iter().all(|p| p.neighbors_known));
    }

    // Tick 1: B disagrees with A, C's SYNC has not arrived yet.
    lobby.step_all(DT).unwrap();
    let b = lobby.session(1);
    assert_eq!(b.view().role(&a), PeerRole::BlamedPeer);
    assert!(!b.blamelock());
    assert_eq!(b.pool().allocated(), 5);
    assert_eq!(lobby.session(2).pool().allocated(), 5);

    // Tick 2: gossip shows every peer blamed by half its neighbors.
    lobby.step_all(DT).unwrap();
    let b = lobby.session(1);
    assert!(b.blamelock());
    assert_eq!(b.view().role(&a), PeerRole::ExemptLeader);
    assert_eq!(b.view().blame_mask(&a), 0);

    for _ in 0..3 {
        lobby.step_all(DT).unwrap();
    }
    assert!(lobby.converged());
    assert!(!any_blamelock(&lobby));
    for session in lobby.sessions() {
        assert_eq!(session.pool().allocated(), 5);
        assert_eq!(session.pool().guids(), 5);
        assert!(session.pending().is_empty());
    }
}

#[test]
fn two_peers_never_exempt_the_leader() {
    let mut lobby = lobby(NetworkConditions::PERFECT, &["a", "b"], &[3, 0]);
    let a = PeerId::from("a");

    for _ in 0..6 {
        lobby.step_all(DT).unwrap();
        for session in lobby.sessions() {
            assert_ne!(session.view().role(&a), PeerRole::ExemptLeader);
            assert!(session.view().roles().all(|(_, r)| r != PeerRole::ExemptLeader));
        }
    }

    assert!(lobby.converged());
    assert_eq!(lobby.session(1).pool().allocated(), 3);
}

#[test]
fn records_on_both_sides_are_merged() {
    let mut lobby = lobby(NetworkConditions::PERFECT, &["a", "b"], &[0, 0]);

    // Disjoint ids: a holds 0..2, b holds 2..4.
    for _ in 0..2 {
        lobby.session_mut(0).pool_mut().allocate().unwrap();
    }
    lobby.session_mut(1).pool_mut().raise_guids(2);
    for _ in 0..2 {
        lobby.session_mut(1).pool_mut().allocate().unwrap();
    }

    for _ in 0..8 {
        lobby.step_all(DT).unwrap();
    }

    assert!(lobby.converged());
    for session in lobby.sessions() {
        assert_eq!(session.pool().allocated(), 4);
        for id in 0..4 {
            assert!(session.pool().contains(id), "{} missing {id}", session.local_id());
        }
    }
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[test]
fn converged_lobby_stays_put() {
    let mut lobby = lobby(NetworkConditions::PERFECT, &["a", "b", "c"], &[4, 1, 0]);
    for _ in 0..10 {
        lobby.step_all(DT).unwrap();
    }
    assert!(lobby.converged());

    let snapshot: Vec<Vec<u8>> = lobby.sessions().map(|s| s.pool().as_bytes().to_vec()).collect();
    let imported: Vec<u64> = lobby.sessions().map(|s| s.stats().records_imported).collect();
    let asks: Vec<u64> = lobby.sessions().map(|s| s.stats().asks_issued).collect();

    for _ in 0..10 {
        lobby.step_all(DT).unwrap();
    }

    for (i, session) in lobby.sessions().enumerate() {
        assert_eq!(session.pool().as_bytes(), snapshot[i].as_slice());
        assert_eq!(session.stats().records_imported, imported[i]);
        assert_eq!(session.stats().asks_issued, asks[i]);
    }
}

#[test]
fn lossy_mesh_still_converges() {
    let conditions = NetworkConditions::POOR.with_seed(0x5eed);
    let mut lobby = lobby(conditions, &["a", "b", "c", "d"], &[12, 6, 6, 6]);

    let mut converged_at = None;
    for tick in 1..=300 {
        lobby.step_all(DT).unwrap();
        if lobby.converged() && !any_blamelock(&lobby) {
            converged_at = Some(tick);
            break;
        }
    }

    println!("converged at tick {converged_at:?}");
    assert!(converged_at.is_some());
    assert!(lobby.mesh().stats().messages_dropped > 0);
    for session in lobby.sessions() {
        assert_eq!(session.pool().allocated(), 12);
        assert_eq!(session.pool().guids(), 12);
    }
}

#[test]
fn pushed_update_reaches_every_peer() {
    let mut lobby = lobby(NetworkConditions::PERFECT, &["a", "b", "c"], &[2, 0, 0]);
    for _ in 0..5 {
        lobby.step_all(DT).unwrap();
    }
    assert!(lobby.converged());

    lobby
        .push_update(0, 1, RecordField::PositionB, [1.0, 2.0, 3.0, 4.0])
        .unwrap();
    lobby.pump();

    let stamp = lobby.session(0).pool().by_id(1).unwrap().timestamp;
    for session in lobby.sessions().skip(1) {
        let record = session.pool().by_id(1).unwrap();
        assert_eq!(record.position(RecordField::PositionB), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(record.timestamp, stamp);
        assert_eq!(session.stats().updates_applied, 1);
    }

    assert!(lobby
        .push_update(0, 99, RecordField::PositionA, [0.0; 4])
        .is_err());
}

// ============================================================================
// DEPARTURES
// ============================================================================

#[test]
fn departed_peer_is_forgotten() {
    let mut lobby = lobby(NetworkConditions::PERFECT, &["a", "b", "c"], &[3, 3, 3]);
    for _ in 0..3 {
        lobby.step_all(DT).unwrap();
    }

    let c = PeerId::from("c");
    let departed = lobby.leave(2).unwrap();
    assert_eq!(departed.local_id(), &c);
    lobby.pump();

    let a = PeerId::from("a");
    let b = PeerId::from("b");
    let alpha = lobby.session(0);
    assert!(!alpha.peers().contains(&c));
    assert_eq!(alpha.peers().local().neighbors, vec![b.clone()]);
    assert!((0..8).all(|i| !alpha.pending().contains_index(&c, i)));

    // b learned a's shrunken neighbor list.
    let bravo = lobby.session(1);
    assert_eq!(bravo.peers().get(&a).unwrap().neighbors, vec![b]);

    // A late SYNC from the departed peer must not recreate it.
    let summary = SyncSummary {
        allocated: 9,
        guids: 9,
        blames: &[1, 1],
    };
    let frame = Message::Sync(summary).encode(40, 40).unwrap();
    let late = MeshEvent::Message {
        peer: c.clone(),
        data: frame.as_bytes().to_vec(),
    };
    let err = lobby
        .session_mut(0)
        .handle_event(late, &mut NullTransport)
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownPeer(ref p) if *p == c));
    assert!(!lobby.session(0).peers().contains(&c));
    assert_eq!(lobby.session(0).stats().unknown_peer_drops, 1);

    for _ in 0..3 {
        lobby.step_all(DT).unwrap();
    }
    assert!(lobby.converged());
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn heartbeat_interval_from_toml() {
    let config = SessionConfig::from_toml_str(
        r#"
        display_name = "slow"
        heartbeat_interval_secs = 0.2
        "#,
    )
    .unwrap();

    let mut lobby = LocalLobby::new(NetworkConditions::PERFECT);
    lobby.join("slow", config).unwrap();

    lobby.step_all(DT).unwrap();
    assert_eq!(lobby.session(0).stats().heartbeats, 0);
    lobby.step_all(DT).unwrap();
    assert_eq!(lobby.session(0).stats().heartbeats, 1);
    assert_eq!(lobby.session(0).config().display_name, "slow");
}
