//! # Peer State
//!
//! Bookkeeping for every lobby participant, the local peer included.
//!
//! ## Design
//!
//! - `blames[i]` always refers to `neighbors[i]`; the two vectors change
//!   length together
//! - SYNC carries absolute counters, so a late or lost heartbeat only leaves
//!   a peer's summary stale, never wrong
//! - The table is ordered by id, which fixes the local NEIGHBORS order

use std::collections::BTreeMap;

use crate::protocol::{stamp_newer, SyncSummary};
use crate::transport::PeerId;

/// State of one participant.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerState {
    /// Transport-level id.
    pub id: PeerId,
    /// Display name from GREET.
    pub name: String,
    /// True only for the self-record.
    pub local: bool,
    /// Whether this peer initialised the lobby. A hint, never authority.
    pub creator: bool,
    /// Logical time. Local: advanced by the heartbeat. Remote: last stamp seen.
    pub stamp: f64,
    /// Outgoing sequence counter (local) or last observed remote counter.
    pub sent: u16,
    /// Sequence of the last accepted SYNC.
    pub last_sync: Option<u16>,
    /// Live records in this peer's pool, as last reported.
    pub entities_count: u16,
    /// This peer's id counter, as last reported.
    pub guids: u16,
    /// Ids this peer claims to see.
    pub neighbors: Vec<PeerId>,
    /// One verdict per neighbor slot. 1 = blamed.
    pub blames: Vec<u8>,
    /// False until NEIGHBORS arrived from this peer.
    pub neighbors_known: bool,
    /// Smoothed round-trip time.
    pub latency_ms: Option<f32>,
}

impl PeerState {
    /// Creates the self-record. Its neighbor list is always known.
    #[must_use]
    pub fn new_local(id: PeerId, name: impl Into<String>, creator: bool) -> Self {
        Self {
            neighbors_known: true,
            local: true,
            ..Self::new_remote(id, name, creator)
        }
    }

    /// Creates the record for a peer that just greeted.
    #[must_use]
    pub fn new_remote(id: PeerId, name: impl Into<String>, creator: bool) -> Self {
        Self {
            id,
            name: name.into(),
            local: false,
            creator,
            stamp: 0.0,
            sent: 0,
            last_sync: None,
            entities_count: 0,
            guids: 0,
            neighbors: Vec::new(),
            blames: Vec::new(),
            neighbors_known: false,
            latency_ms: None,
        }
    }

    /// Replaces the neighbor list.
    ///
    /// Verdicts follow their neighbor by id; new neighbors start unblamed
    /// and dropped neighbors lose their slot.
    pub fn set_neighbors(&mut self, neighbors: Vec<PeerId>) {
        self.blames = neighbors.iter().map(|id| self.blame_for(id)).collect();
        self.neighbors = neighbors;
        self.neighbors_known = true;
    }

    /// Replaces the blame vector, truncated or zero-padded to the neighbor count.
    pub fn set_blames(&mut self, blames: &[u8]) {
        self.blames.clear();
        self.blames
            .extend(blames.iter().take(self.neighbors.len()).map(|&b| u8::from(b != 0)));
        self.blames.resize(self.neighbors.len(), 0);
    }

    /// This peer's verdict on `target`. 0 if `target` is not its neighbor.
    #[must_use]
    pub fn blame_for(&self, target: &PeerId) -> u8 {
        self.neighbors
            .iter()
            .position(|id| id == target)
            .and_then(|i| self.blames.get(i).copied())
            .unwrap_or(0)
    }

    /// Applies a received SYNC. Returns false if it is older than the last one.
    pub fn record_sync(&mut self, stamp: u16, sequence: u16, summary: &SyncSummary<'_>) -> bool {
        if let Some(last) = self.last_sync {
            if !stamp_newer(sequence, last) {
                return false;
            }
        }
        self.last_sync = Some(sequence);
        self.sent = sequence;
        self.stamp = f64::from(stamp);
        self.entities_count = summary.allocated;
        self.guids = summary.guids;
        self.set_blames(summary.blames);
        true
    }

    /// Folds a round-trip sample into the smoothed latency.
    pub fn record_latency(&mut self, sample_ms: f32, smoothing: f32) {
        self.latency_ms = Some(match self.latency_ms {
            Some(current) => current + smoothing * (sample_ms - current),
            None => sample_ms,
        });
    }

    /// Gets the next outgoing sequence number and increments it.
    #[inline]
    pub fn next_sequence(&mut self) -> u16 {
        let seq = self.sent;
        self.sent = self.sent.wrapping_add(1);
        seq
    }

    /// Logical time as it travels on the wire.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn wire_stamp(&self) -> u16 {
        // Header field wraps at 65536.
        self.stamp.rem_euclid(65536.0) as u16
    }

    /// Whether this peer's counters differ from `(count, guids)`.
    #[inline]
    #[must_use]
    pub fn disagrees_with(&self, count: u16, guids: u16) -> bool {
        self.entities_count != count || self.guids != guids
    }
}

/// Every known participant, keyed by id.
#[derive(Clone, Debug)]
pub struct PeerTable {
    local: PeerId,
    peers: BTreeMap<PeerId, PeerState>,
}

impl PeerTable {
    /// Creates a table holding only the self-record.
    #[must_use]
    pub fn new(local: PeerState) -> Self {
        let id = local.id.clone();
        let mut peers = BTreeMap::new();
        peers.insert(id.clone(), local);
        Self { local: id, peers }
    }

    /// Id of the self-record.
    #[inline]
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// The self-record.
    #[must_use]
    pub fn local(&self) -> &PeerState {
        &self.peers[&self.local]
    }

    /// Mutable self-record.
    pub fn local_mut(&mut self) -> &mut PeerState {
        self.peers
            .get_mut(&self.local)
            .unwrap_or_else(|| unreachable!("self-record is never removed"))
    }

    /// Looks up a peer.
    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<&PeerState> {
        self.peers.get(id)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut PeerState> {
        self.peers.get_mut(id)
    }

    /// Whether `id` has a state.
    #[must_use]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Adds or replaces a remote peer. The self-record cannot be replaced.
    pub fn insert(&mut self, state: PeerState) -> bool {
        if state.id == self.local {
            return false;
        }
        self.peers.insert(state.id.clone(), state);
        true
    }

    /// Drops a remote peer. The self-record cannot be removed.
    pub fn remove(&mut self, id: &PeerId) -> Option<PeerState> {
        if *id == self.local {
            return None;
        }
        self.peers.remove(id)
    }

    /// Number of participants, the local peer included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Always false; the self-record is permanent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All participants in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerState> {
        self.peers.values()
    }

    /// Remote ids in id order.
    #[must_use]
    pub fn remote_ids(&self) -> Vec<PeerId> {
        self.peers
            .keys()
            .filter(|id| **id != self.local)
            .cloned()
            .collect()
    }

    /// Sets the local neighbor list to every greeted remote peer.
    ///
    /// Returns true if the list changed.
    pub fn refresh_local_neighbors(&mut self) -> bool {
        let remote = self.remote_ids();
        let local = self.local_mut();
        if local.neighbors == remote {
            return false;
        }
        local.set_neighbors(remote);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<PeerId> {
        names.iter().map(|n| PeerId::from(*n)).collect()
    }

    #[test]
    fn test_blames_follow_neighbors() {
        let mut peer = PeerState::new_remote("a".into(), "alpha", false);
        assert!(!peer.neighbors_known);

        peer.set_neighbors(ids(&["b", "c", "d"]));
        peer.set_blames(&[0, 1, 1]);
        assert_eq!(peer.blame_for(&"c".into()), 1);

        // Reordered and shrunk: verdicts stay with their ids.
        peer.set_neighbors(ids(&["d", "b"]));
        assert_eq!(peer.blames, vec![1, 0]);
        assert_eq!(peer.blame_for(&"c".into()), 0);

        peer.set_neighbors(ids(&["d", "b", "e"]));
        assert_eq!(peer.blames.len(), peer.neighbors.len());
        assert_eq!(peer.blames, vec![1, 0, 0]);
    }

    #[test]
    fn test_set_blames_truncates_and_pads() {
        let mut peer = PeerState::new_remote("a".into(), "alpha", false);
        peer.set_neighbors(ids(&["b", "c"]));

        peer.set_blames(&[1, 1, 1, 1]);
        assert_eq!(peer.blames, vec![1, 1]);

        peer.set_blames(&[7]);
        assert_eq!(peer.blames, vec![1, 0]);
    }

    #[test]
    fn test_record_sync_rejects_stale() {
        let mut peer = PeerState::new_remote("a".into(), "alpha", false);
        let summary = SyncSummary {
            allocated: 4,
            guids: 5,
            blames: &[],
        };
        assert!(peer.record_sync(10, 0xFFFF, &summary));

        let newer = SyncSummary {
            allocated: 6,
            ..summary
        };
        assert!(peer.record_sync(11, 0, &newer));
        assert_eq!(peer.entities_count, 6);

        assert!(!peer.record_sync(9, 0xFFFE, &summary));
        assert!(!peer.record_sync(11, 0, &summary));
        assert_eq!(peer.entities_count, 6);
    }

    #[test]
    fn test_latency_smoothing() {
        let mut peer = PeerState::new_remote("a".into(), "alpha", false);
        peer.record_latency(100.0, 0.5);
        assert_eq!(peer.latency_ms, Some(100.0));
        peer.record_latency(200.0, 0.5);
        assert_eq!(peer.latency_ms, Some(150.0));
    }

    #[test]
    fn test_sequence_wraps() {
        let mut peer = PeerState::new_local("me".into(), "me", true);
        peer.sent = u16::MAX;
        assert_eq!(peer.next_sequence(), u16::MAX);
        assert_eq!(peer.next_sequence(), 0);

        peer.stamp = 65537.5;
        assert_eq!(peer.wire_stamp(), 1);
    }

    #[test]
    fn test_table_keeps_self_record() {
        let mut table = PeerTable::new(PeerState::new_local("m".into(), "me", false));
        assert!(!table.insert(PeerState::new_remote("m".into(), "impostor", false)));
        assert!(table.remove(&"m".into()).is_none());
        assert_eq!(table.local().name, "me");

        table.insert(PeerState::new_remote("z".into(), "zulu", false));
        table.insert(PeerState::new_remote("b".into(), "bravo", false));
        assert!(table.refresh_local_neighbors());
        assert!(!table.refresh_local_neighbors());
        assert_eq!(table.local().neighbors, ids(&["b", "z"]));
        assert_eq!(table.len(), 3);

        table.remove(&"b".into());
        assert!(table.refresh_local_neighbors());
        assert_eq!(table.local().neighbors, ids(&["z"]));
    }
}
