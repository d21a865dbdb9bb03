//! # Lobby Simulation
//!
//! An in-process mesh for tests, demos and benchmarks.
//!
//! ## Features
//!
//! - Per-peer FIFO inboxes (`crossbeam-channel`)
//! - Seeded packet loss and duplication on the unreliable channel
//! - Reliable messages are never dropped or duplicated
//! - First peer to join is the leader
//!
//! [`LocalLobby`] wires one [`Session`] per peer to the mesh and steps them
//! all with a fake clock.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SyncResult;
use crate::session::{Session, SessionConfig};
use crate::transport::{Delivery, MeshEvent, MeshTransport, PeerId, TransportStats};
use meshsync_core::RecordField;

/// Most delivery rounds one [`LocalLobby::pump`] runs.
const MAX_PUMP_ROUNDS: usize = 10_000;

/// Network conditions for simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NetworkConditions {
    /// Latency reported in connect events, in milliseconds.
    pub base_latency_ms: u16,
    /// Unreliable packet loss percentage (0-100).
    pub packet_loss_percent: u8,
    /// Unreliable duplicate percentage (0-100).
    pub duplicate_percent: u8,
    /// Seed for the loss/duplication RNG.
    pub seed: u64,
}

impl NetworkConditions {
    /// Perfect network conditions (LAN).
    pub const PERFECT: Self = Self {
        base_latency_ms: 1,
        packet_loss_percent: 0,
        duplicate_percent: 0,
        seed: 0,
    };

    /// Average network conditions (cable).
    pub const AVERAGE: Self = Self {
        base_latency_ms: 50,
        packet_loss_percent: 1,
        duplicate_percent: 1,
        seed: 0x5EED,
    };

    /// Poor network conditions (mobile/wifi).
    pub const POOR: Self = Self {
        base_latency_ms: 100,
        packet_loss_percent: 20,
        duplicate_percent: 5,
        seed: 0xBAD,
    };

    /// Same conditions, different RNG stream.
    #[must_use]
    pub const fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::PERFECT
    }
}

struct Member {
    id: PeerId,
    inbox: Sender<MeshEvent>,
}

struct MeshInner {
    conditions: NetworkConditions,
    rng: StdRng,
    /// Join order. The first member is the leader.
    members: Vec<Member>,
    stats: TransportStats,
}

impl MeshInner {
    fn roll(&mut self, percent: u8) -> bool {
        percent > 0 && self.rng.gen_range(0..100u8) < percent
    }

    fn deliver(&mut self, from: &PeerId, to: Option<&PeerId>, delivery: Delivery, data: &[u8]) {
        let recipients: Vec<Sender<MeshEvent>> = self
            .members
            .iter()
            .filter(|m| m.id != *from && to.map_or(true, |to| m.id == *to))
            .map(|m| m.inbox.clone())
            .collect();

        for inbox in recipients {
            self.stats.record_send(data.len());
            let mut copies = 1;
            if delivery == Delivery::Unreliable {
                if self.roll(self.conditions.packet_loss_percent) {
                    self.stats.messages_dropped += 1;
                    continue;
                }
                if self.roll(self.conditions.duplicate_percent) {
                    copies = 2;
                }
            }
            for _ in 0..copies {
                let event = MeshEvent::Message {
                    peer: from.clone(),
                    data: data.to_vec(),
                };
                if inbox.send(event).is_ok() {
                    self.stats.messages_received += 1;
                }
            }
        }
    }
}

/// Shared in-process mesh. Cloning yields another handle to the same mesh.
#[derive(Clone)]
pub struct LoopbackMesh {
    inner: Arc<Mutex<MeshInner>>,
}

impl LoopbackMesh {
    /// Creates an empty mesh.
    #[must_use]
    pub fn new(conditions: NetworkConditions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MeshInner {
                conditions,
                rng: StdRng::seed_from_u64(conditions.seed),
                members: Vec::new(),
                stats: TransportStats::default(),
            })),
        }
    }

    /// Adds a peer. Everyone already present and the newcomer receive
    /// `Connected` events for each other.
    pub fn join(&self, id: impl Into<PeerId>) -> (LoopbackEndpoint, Receiver<MeshEvent>) {
        let id = id.into();
        let (tx, rx) = unbounded();
        let mut inner = self.inner.lock();
        let latency_ms = Some(f32::from(inner.conditions.base_latency_ms));

        for member in &inner.members {
            let _ = member.inbox.send(MeshEvent::Connected {
                peer: id.clone(),
                latency_ms,
            });
            let _ = tx.send(MeshEvent::Connected {
                peer: member.id.clone(),
                latency_ms,
            });
        }
        inner.members.push(Member {
            id: id.clone(),
            inbox: tx,
        });
        drop(inner);

        let endpoint = LoopbackEndpoint {
            id,
            mesh: self.clone(),
        };
        (endpoint, rx)
    }

    /// Removes a peer and tells everyone else.
    pub fn leave(&self, id: &PeerId) {
        let mut inner = self.inner.lock();
        inner.members.retain(|m| m.id != *id);
        for member in &inner.members {
            let _ = member
                .inbox
                .send(MeshEvent::Disconnected { peer: id.clone() });
        }
    }

    /// Current members in join order.
    #[must_use]
    pub fn members(&self) -> Vec<PeerId> {
        self.inner.lock().members.iter().map(|m| m.id.clone()).collect()
    }

    /// The first peer still present.
    #[must_use]
    pub fn leader(&self) -> Option<PeerId> {
        self.inner.lock().members.first().map(|m| m.id.clone())
    }

    /// Mesh-wide statistics.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.inner.lock().stats
    }
}

/// One peer's handle on a [`LoopbackMesh`].
#[derive(Clone)]
pub struct LoopbackEndpoint {
    id: PeerId,
    mesh: LoopbackMesh,
}

impl LoopbackEndpoint {
    /// The peer this endpoint sends as.
    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }
}

impl MeshTransport for LoopbackEndpoint {
    fn send(&mut self, to: &PeerId, delivery: Delivery, data: &[u8]) {
        self.mesh
            .inner
            .lock()
            .deliver(&self.id, Some(to), delivery, data);
    }

    fn broadcast(&mut self, delivery: Delivery, data: &[u8]) {
        self.mesh.inner.lock().deliver(&self.id, None, delivery, data);
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.mesh
            .members()
            .into_iter()
            .filter(|id| *id != self.id)
            .collect()
    }

    fn leader(&self) -> Option<PeerId> {
        self.mesh.leader()
    }
}

struct LobbyMember {
    session: Session,
    endpoint: LoopbackEndpoint,
    inbox: Receiver<MeshEvent>,
}

/// Several sessions on one loopback mesh, stepped together.
pub struct LocalLobby {
    mesh: LoopbackMesh,
    members: Vec<LobbyMember>,
}

impl LocalLobby {
    /// Creates an empty lobby.
    #[must_use]
    pub fn new(conditions: NetworkConditions) -> Self {
        Self {
            mesh: LoopbackMesh::new(conditions),
            members: Vec::new(),
        }
    }

    /// Adds a session whose peer id is `id`. Returns its position.
    ///
    /// # Errors
    ///
    /// [`crate::SyncError::Config`] if `config` is invalid.
    pub fn join(&mut self, id: &str, config: SessionConfig) -> SyncResult<usize> {
        let session = Session::new(PeerId::from(id), config)?;
        let (endpoint, inbox) = self.mesh.join(id);
        self.members.push(LobbyMember {
            session,
            endpoint,
            inbox,
        });
        Ok(self.members.len() - 1)
    }

    /// Removes the session at `index` from the mesh and returns it.
    /// Later sessions shift down by one.
    pub fn leave(&mut self, index: usize) -> Option<Session> {
        if index >= self.members.len() {
            return None;
        }
        let member = self.members.remove(index);
        self.mesh.leave(member.endpoint.id());
        Some(member.session)
    }

    /// Delivers queued events until every inbox is empty.
    ///
    /// Returns the number of events handled.
    pub fn pump(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut handled = 0;
            for member in &mut self.members {
                while let Ok(event) = member.inbox.try_recv() {
                    if let Err(err) = member.session.handle_event(event, &mut member.endpoint) {
                        tracing::trace!(peer = %member.endpoint.id(), error = %err, "event dropped");
                    }
                    handled += 1;
                }
            }
            if handled == 0 {
                break;
            }
            total += handled;
        }
        total
    }

    /// Advances every session by `dt` seconds, then delivers everything sent.
    ///
    /// # Errors
    ///
    /// The first session whose heartbeat failed.
    pub fn step_all(&mut self, dt: f64) -> SyncResult<()> {
        for member in &mut self.members {
            member.session.update(dt, &mut member.endpoint)?;
        }
        self.pump();
        Ok(())
    }

    /// Pushes a record update from the session at `index`.
    ///
    /// # Errors
    ///
    /// See [`Session::push_update`].
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn push_update(
        &mut self,
        index: usize,
        id: u16,
        field: RecordField,
        position: [f32; 4],
    ) -> SyncResult<()> {
        let member = &mut self.members[index];
        member
            .session
            .push_update(id, field, position, &mut member.endpoint)
    }

    /// The session at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn session(&self, index: usize) -> &Session {
        &self.members[index].session
    }

    /// Mutable session at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn session_mut(&mut self, index: usize) -> &mut Session {
        &mut self.members[index].session
    }

    /// Every session in join order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.members.iter().map(|m| &m.session)
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the lobby has no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether every pool holds the same record count and id counter.
    #[must_use]
    pub fn converged(&self) -> bool {
        let mut counters = self
            .sessions()
            .map(|s| (s.pool().allocated(), s.pool().guids()));
        match counters.next() {
            Some(first) => counters.all(|c| c == first),
            None => true,
        }
    }

    /// The underlying mesh.
    #[must_use]
    pub const fn mesh(&self) -> &LoopbackMesh {
        &self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_announces_both_ways() {
        let mesh = LoopbackMesh::new(NetworkConditions::PERFECT);
        let (_a, a_rx) = mesh.join("a");
        let (b, b_rx) = mesh.join("b");

        assert!(matches!(a_rx.try_recv(), Ok(MeshEvent::Connected { peer, .. }) if peer.as_str() == "b"));
        assert!(matches!(b_rx.try_recv(), Ok(MeshEvent::Connected { peer, .. }) if peer.as_str() == "a"));
        assert_eq!(b.leader(), Some(PeerId::from("a")));
        assert_eq!(b.connected_peers(), vec![PeerId::from("a")]);
    }

    #[test]
    fn test_reliable_never_dropped() {
        let conditions = NetworkConditions {
            packet_loss_percent: 100,
            ..NetworkConditions::PERFECT
        };
        let mesh = LoopbackMesh::new(conditions);
        let (mut a, _a_rx) = mesh.join("a");
        let (_b, b_rx) = mesh.join("b");
        let _ = b_rx.try_recv();

        a.broadcast(Delivery::Unreliable, b"lost");
        a.send(&"b".into(), Delivery::Reliable, b"kept");

        let event = b_rx.try_recv().unwrap();
        assert!(matches!(event, MeshEvent::Message { data, .. } if data == b"kept"));
        assert!(b_rx.try_recv().is_err());
        assert_eq!(mesh.stats().messages_dropped, 1);
    }

    #[test]
    fn test_leave_notifies_and_moves_leader() {
        let mesh = LoopbackMesh::new(NetworkConditions::PERFECT);
        let (_a, _a_rx) = mesh.join("a");
        let (b, b_rx) = mesh.join("b");
        let _ = b_rx.try_recv();

        mesh.leave(&"a".into());
        assert!(matches!(b_rx.try_recv(), Ok(MeshEvent::Disconnected { peer }) if peer.as_str() == "a"));
        assert_eq!(b.leader(), Some(PeerId::from("b")));
    }

    #[test]
    fn test_lobby_handshake() {
        let mut lobby = LocalLobby::new(NetworkConditions::PERFECT);
        lobby.join("a", SessionConfig::named("alpha")).unwrap();
        lobby.join("b", SessionConfig::named("bravo")).unwrap();
        assert!(lobby.pump() > 0);

        let a = lobby.session(0);
        let b_state = a.peers().get(&"b".into()).unwrap();
        assert_eq!(b_state.name, "bravo");
        assert!(b_state.neighbors_known);
        assert_eq!(b_state.neighbors, vec![PeerId::from("a")]);
        assert_eq!(lobby.pump(), 0);
    }
}
