//! # MESHSYNC Networking - The Lobby Protocol
//!
//! Peer-to-peer entity synchronization for a small lobby of untrusted peers
//! with no authority server.
//!
//! ## Architecture
//!
//! This crate implements everything above the transport:
//!
//! - **Protocol**: fixed size-class binary frames whose payload is read through
//!   typed views, plus a tiny text protocol for GREET / NEIGHBORS
//! - **Peers**: per-remote bookkeeping (clock, counters, adjacency, blames)
//! - **Session**: handshake, heartbeat, blame / blamelock evaluation and
//!   pull-based reconciliation
//! - **Transport**: the seam to the mesh provider that owns sockets/signaling
//! - **Simulation**: an in-process loopback mesh for tests and demos
//!
//! ## Trust Model
//!
//! ```text
//! PEER A                 PEER B                 PEER C
//!   |--- SYNC(5,5) ------->|                      |
//!   |                      | "A disagrees with me"|
//!   |<-- SYNC(blame A) ----|--- SYNC(blame A) --->|
//!   |                      |                      |
//!   |<-- ENTITY/ASK #3 ----|   A blamed by a majority of its neighbors:
//!   |--- ENTITY/RESPONSE ->|   B and C pull A's records by pool index
//! ```
//!
//! Nobody is authoritative by default. When a majority of the lobby is
//! mutually blamed (blamelock) and the lobby has more than two peers, the
//! leader's counters stop being blamed and its records become the reference.
//!
//! ## Example
//!
//! ```rust
//! use meshsync_networking::{LocalLobby, NetworkConditions, SessionConfig};
//!
//! let mut lobby = LocalLobby::new(NetworkConditions::PERFECT);
//! lobby.join("alpha", SessionConfig::default()).unwrap();
//! lobby.join("bravo", SessionConfig::default()).unwrap();
//! lobby.pump();
//!
//! lobby.session_mut(0).pool_mut().allocate().unwrap();
//! for _ in 0..4 {
//!     lobby.step_all(0.1).unwrap();
//! }
//! assert_eq!(lobby.session(1).pool().allocated(), 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod simulation;
pub mod transport;

// Re-exports for convenience
pub use error::{SyncError, SyncResult};
pub use peer::{PeerState, PeerTable};
pub use protocol::{
    ControlMessage, EntitySubtype, Frame, FrameHeader, Message, MessageKind, SizeClass,
    SyncSummary,
};
pub use session::{
    LobbyView, MajorityRule, PeerRole, PendingRequests, Session, SessionConfig, SessionDriver,
    SessionStats, TickLoop,
};
pub use simulation::{LocalLobby, LoopbackEndpoint, LoopbackMesh, NetworkConditions};
pub use transport::{Delivery, MeshEvent, MeshTransport, PeerId};
