//! # Transport Seam
//!
//! The mesh provider owns sockets, signaling and NAT traversal. This crate
//! only sees peer ids, a reliable and an unreliable channel, and inbound
//! events.
//!
//! ## Design
//!
//! - Sends are fire-and-forget; the session never blocks on I/O
//! - Inbound traffic arrives as [`MeshEvent`]s on a queue
//! - The provider elects the leader (first peer into the lobby)

use std::fmt;

/// Opaque transport-level peer identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Delivery guarantee requested for one send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Ordered, never dropped. GREET, NEIGHBORS, forced SYNC, updates.
    Reliable,
    /// May be lost or reordered. Heartbeats and reconciliation.
    Unreliable,
}

/// Inbound notification from the mesh provider.
#[derive(Clone, Debug, PartialEq)]
pub enum MeshEvent {
    /// A transport-level connection to `peer` opened.
    Connected {
        /// The new peer.
        peer: PeerId,
        /// Round-trip estimate from the handshake, if the provider has one.
        latency_ms: Option<f32>,
    },
    /// The connection to `peer` closed.
    Disconnected {
        /// The departed peer.
        peer: PeerId,
    },
    /// Bytes from `peer`, text or binary.
    Message {
        /// Sender.
        peer: PeerId,
        /// Raw message.
        data: Vec<u8>,
    },
    /// Fresh round-trip sample for `peer`.
    LatencySample {
        /// Measured peer.
        peer: PeerId,
        /// Round-trip time in milliseconds.
        latency_ms: f32,
    },
}

/// Outbound half of the mesh provider.
pub trait MeshTransport {
    /// Sends `data` to one peer.
    fn send(&mut self, to: &PeerId, delivery: Delivery, data: &[u8]);

    /// Sends `data` to every connected peer.
    fn broadcast(&mut self, delivery: Delivery, data: &[u8]);

    /// Peers with an open transport connection.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// The lobby leader, if the provider has elected one.
    fn leader(&self) -> Option<PeerId>;
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages sent, counting each broadcast recipient.
    pub messages_sent: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Messages placed in a recipient's inbox.
    pub messages_received: u64,
    /// Unreliable messages lost on the way out.
    pub messages_dropped: u64,
}

impl TransportStats {
    /// Records one outbound message.
    pub fn record_send(&mut self, len: usize) {
        self.messages_sent += 1;
        self.bytes_sent += len as u64;
    }
}

/// Transport that records every send. Used by session unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    pub peers: Vec<PeerId>,
    pub leader: Option<PeerId>,
    /// `(recipient, delivery, bytes)`; `None` recipient means broadcast.
    pub sent: Vec<(Option<PeerId>, Delivery, Vec<u8>)>,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn with_peers(peers: &[&str]) -> Self {
        Self {
            peers: peers.iter().map(|p| PeerId::from(*p)).collect(),
            leader: None,
            sent: Vec::new(),
        }
    }

    pub fn take(&mut self) -> Vec<(Option<PeerId>, Delivery, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }
}

#[cfg(test)]
impl MeshTransport for RecordingTransport {
    fn send(&mut self, to: &PeerId, delivery: Delivery, data: &[u8]) {
        self.sent.push((Some(to.clone()), delivery, data.to_vec()));
    }

    fn broadcast(&mut self, delivery: Delivery, data: &[u8]) {
        self.sent.push((None, delivery, data.to_vec()));
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.clone()
    }

    fn leader(&self) -> Option<PeerId> {
        self.leader.clone()
    }
}
