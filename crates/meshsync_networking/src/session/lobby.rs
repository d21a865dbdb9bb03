//! # Lobby Evaluation
//!
//! Who is blamed, whether the lobby is in blamelock, and who is trusted.
//!
//! ## Trust Roles
//!
//! ```text
//!                 neighbors unknown
//!   ┌────────────┐ ───────────────────► Unverified   (mask 1)
//!   │ PeerState  │  blamelock, leader,
//!   │ + gossiped │  local has > 1 neighbor
//!   │   blames   │ ───────────────────► ExemptLeader (mask 0)
//!   └────────────┘  majority of own neighbors accuse
//!                  ───────────────────► BlamedPeer   (mask 1)
//!                  otherwise ─────────► Peer         (mask 1)
//! ```
//!
//! Records are pulled from `BlamedPeer`s and from the `ExemptLeader`.
//!
//! A [`LobbyView`] is a pure function of the peer table. The session computes
//! one per heartbeat instead of flipping flags while it walks the peers.

use std::collections::BTreeMap;

use crate::peer::{PeerState, PeerTable};
use crate::transport::PeerId;

/// Trust state of one peer, as judged by the local peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// Its neighbor list never arrived. Presumed guilty.
    Unverified,
    /// In good standing.
    Peer,
    /// A majority of its own neighbors accuse it. Reconciled from.
    BlamedPeer,
    /// Lobby leader during blamelock. Its counters are the reference.
    ExemptLeader,
}

impl PeerRole {
    /// Multiplier applied to a counter mismatch with this peer.
    #[inline]
    #[must_use]
    pub const fn blame_mask(self) -> u8 {
        match self {
            Self::ExemptLeader => 0,
            Self::Unverified | Self::Peer | Self::BlamedPeer => 1,
        }
    }

    /// Whether the local peer pulls records from a peer in this role.
    ///
    /// Blamed peers are reconciled from; during blamelock so is the leader,
    /// whose records are the reference.
    #[inline]
    #[must_use]
    pub const fn pulls_records(self) -> bool {
        matches!(self, Self::BlamedPeer | Self::ExemptLeader)
    }
}

/// What counts as "a majority of its neighbors".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MajorityRule {
    /// Exactly half counts.
    pub tie_counts: bool,
}

impl MajorityRule {
    /// More than half.
    pub const STRICT: Self = Self { tie_counts: false };
    /// At least half.
    pub const INCLUSIVE: Self = Self { tie_counts: true };

    /// Whether `votes` out of `of` is a majority. Zero voters never are.
    #[inline]
    #[must_use]
    pub const fn is_majority(self, votes: usize, of: usize) -> bool {
        if of == 0 {
            false
        } else if self.tie_counts {
            votes * 2 >= of
        } else {
            votes * 2 > of
        }
    }
}

impl Default for MajorityRule {
    fn default() -> Self {
        Self::INCLUSIVE
    }
}

/// One heartbeat's verdict on the whole lobby.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobbyView {
    roles: BTreeMap<PeerId, PeerRole>,
    accusers: BTreeMap<PeerId, usize>,
    blamed: usize,
    players: usize,
    blamelock: bool,
}

impl LobbyView {
    /// Evaluates the table.
    ///
    /// A peer is blamed when a majority (per `rule`) of its own neighbors
    /// accuse it in their latest blame vectors. Blamelock holds when blamed
    /// peers are strictly more than half of all players.
    #[must_use]
    pub fn evaluate(table: &PeerTable, leader: Option<&PeerId>, rule: MajorityRule) -> Self {
        let mut accusers = BTreeMap::new();
        let mut blamed_ids = Vec::new();

        for peer in table.iter() {
            let votes = accusers_of(table, peer);
            accusers.insert(peer.id.clone(), votes);
            if peer.neighbors_known && rule.is_majority(votes, peer.neighbors.len()) {
                blamed_ids.push(peer.id.clone());
            }
        }

        let players = table.len();
        let blamed = blamed_ids.len();
        let blamelock = blamed * 2 > players;
        let exemption_possible = blamelock && table.local().neighbors.len() > 1;

        let roles = table
            .iter()
            .map(|peer| {
                let role = if !peer.neighbors_known {
                    PeerRole::Unverified
                } else if exemption_possible && leader == Some(&peer.id) {
                    PeerRole::ExemptLeader
                } else if blamed_ids.contains(&peer.id) {
                    PeerRole::BlamedPeer
                } else {
                    PeerRole::Peer
                };
                (peer.id.clone(), role)
            })
            .collect();

        Self {
            roles,
            accusers,
            blamed,
            players,
            blamelock,
        }
    }

    /// Role of `id`. Peers not in the table are [`PeerRole::Unverified`].
    #[must_use]
    pub fn role(&self, id: &PeerId) -> PeerRole {
        self.roles.get(id).copied().unwrap_or(PeerRole::Unverified)
    }

    /// Blame mask of `id`.
    #[must_use]
    pub fn blame_mask(&self, id: &PeerId) -> u8 {
        self.role(id).blame_mask()
    }

    /// Neighbors of `id` that accuse it.
    #[must_use]
    pub fn accusers(&self, id: &PeerId) -> usize {
        self.accusers.get(id).copied().unwrap_or(0)
    }

    /// Whether the lobby is in blamelock.
    #[inline]
    #[must_use]
    pub const fn blamelock(&self) -> bool {
        self.blamelock
    }

    /// Peers blamed by a majority of their neighbors.
    #[inline]
    #[must_use]
    pub const fn blamed_count(&self) -> usize {
        self.blamed
    }

    /// Players considered, the local peer included.
    #[inline]
    #[must_use]
    pub const fn players(&self) -> usize {
        self.players
    }

    /// Every role in id order.
    pub fn roles(&self) -> impl Iterator<Item = (&PeerId, PeerRole)> {
        self.roles.iter().map(|(id, role)| (id, *role))
    }
}

fn accusers_of(table: &PeerTable, peer: &PeerState) -> usize {
    peer.neighbors
        .iter()
        .filter(|neighbor| {
            table
                .get(neighbor)
                .is_some_and(|state| state.blame_for(&peer.id) == 1)
        })
        .count()
}

/// The local peer's verdict on each of its neighbors, in neighbor order.
///
/// A neighbor whose last reported `(entities_count, guids)` differs from the
/// local pool's is blamed, multiplied by its mask from `view`.
#[must_use]
pub fn local_blames(table: &PeerTable, view: &LobbyView) -> Vec<u8> {
    let local = table.local();
    local
        .neighbors
        .iter()
        .map(|id| match table.get(id) {
            Some(neighbor) if neighbor.disagrees_with(local.entities_count, local.guids) => {
                view.blame_mask(id)
            }
            _ => 0,
        })
        .collect()
}
