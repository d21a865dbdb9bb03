//! # Synchronization Session
//!
//! One peer's side of the lobby protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SESSION                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MeshEvent ──► handle_event ──► GREET / NEIGHBORS / SYNC    │
//! │                                  ENTITY / ENTITY_UPDATE     │
//! │                                        │                    │
//! │  update(dt) ──► heartbeat              ▼                    │
//! │   1. local counters        ┌───────────────────────┐        │
//! │   2. expire pending asks   │ PeerTable │ EntityPool│        │
//! │   3. blame neighbors       └───────────────────────┘        │
//! │   4. evaluate LobbyView                ▲                    │
//! │   5. ask blamed neighbors ─────────────┘ (RESPONSE import)  │
//! │   6. broadcast SYNC                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every method takes `&mut self`; dispatch and heartbeat never interleave.
//! Faults are logged, counted and returned, never panics.

mod config;
mod driver;
mod lobby;
mod pending;
mod tick;

pub use config::SessionConfig;
pub use driver::SessionDriver;
pub use lobby::{local_blames, LobbyView, MajorityRule, PeerRole};
pub use pending::{Expiry, PendingRequests, RequestKey};
pub use tick::TickLoop;

use std::collections::HashMap;

use meshsync_core::{EntityPool, EntityRecord, PoolError, RecordField};

use crate::error::{SyncError, SyncResult};
use crate::peer::{PeerState, PeerTable};
use crate::protocol::{
    stamp_newer, ControlMessage, EntityUpdate, Frame, FrameHeader, Message, SyncSummary,
};
use crate::transport::{Delivery, MeshEvent, MeshTransport, PeerId};

/// Session counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages handed to the transport, text and binary.
    pub frames_sent: u64,
    /// Messages received from the transport.
    pub frames_received: u64,
    /// Messages dropped because they could not be decoded.
    pub malformed_dropped: u64,
    /// Messages dropped because the sender never greeted.
    pub unknown_peer_drops: u64,
    /// SYNCs older than the last one accepted from the same peer.
    pub stale_syncs: u64,
    /// ENTITY/ASKs sent, retries included.
    pub asks_issued: u64,
    /// ENTITY/ASKs answered.
    pub asks_answered: u64,
    /// Responses that carried a record.
    pub responses_found: u64,
    /// Responses for an empty index.
    pub responses_missed: u64,
    /// Responses matching no pending ask.
    pub unsolicited_responses: u64,
    /// Records added to the pool by reconciliation.
    pub records_imported: u64,
    /// Received records whose id was already present.
    pub duplicates_ignored: u64,
    /// Expired asks sent again.
    pub requests_retried: u64,
    /// Asks abandoned after their last retry.
    pub requests_expired: u64,
    /// ENTITY_UPDATEs written into the pool.
    pub updates_applied: u64,
    /// ENTITY_UPDATEs for unknown records or older than the stored one.
    pub updates_ignored: u64,
    /// Heartbeats run.
    pub heartbeats: u64,
}

/// The lobby protocol for one local peer.
pub struct Session {
    config: SessionConfig,
    rule: MajorityRule,
    pool: EntityPool,
    peers: PeerTable,
    view: LobbyView,
    pending: PendingRequests,
    /// Next pool index to ask each blamed neighbor for.
    cursors: HashMap<PeerId, u16>,
    /// Seconds since the session started.
    clock: f64,
    heartbeat_accumulator: f64,
    /// Transport-level connections seen.
    players: usize,
    /// Latency samples for peers that connected but have not greeted yet.
    early_latency: HashMap<PeerId, f32>,
    stats: SessionStats,
}

impl Session {
    /// Creates a session for the local peer `local_id`.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] if the configuration is invalid.
    pub fn new(local_id: PeerId, config: SessionConfig) -> SyncResult<Self> {
        config.validate()?;

        let local = PeerState::new_local(local_id, config.display_name.clone(), config.creator);
        let rule = MajorityRule {
            tie_counts: config.tie_counts_as_majority,
        };

        Ok(Self {
            rule,
            pool: EntityPool::new(config.pool_capacity),
            peers: PeerTable::new(local),
            view: LobbyView::default(),
            pending: PendingRequests::new(config.request_timeout_secs, config.max_request_retries),
            cursors: HashMap::new(),
            clock: 0.0,
            heartbeat_accumulator: 0.0,
            players: 0,
            early_latency: HashMap::new(),
            stats: SessionStats::default(),
            config,
        })
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The local entity pool.
    #[must_use]
    pub const fn pool(&self) -> &EntityPool {
        &self.pool
    }

    /// Mutable pool, for game logic allocating and freeing records.
    pub fn pool_mut(&mut self) -> &mut EntityPool {
        &mut self.pool
    }

    /// Every known participant.
    #[must_use]
    pub const fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Id of the local peer.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        self.peers.local_id()
    }

    /// Verdict of the last heartbeat.
    #[must_use]
    pub const fn view(&self) -> &LobbyView {
        &self.view
    }

    /// Outstanding reconciliation asks.
    #[must_use]
    pub const fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Transport connections seen, including peers that never greeted.
    #[must_use]
    pub const fn players(&self) -> usize {
        self.players
    }

    /// Seconds of session time.
    #[must_use]
    pub const fn clock(&self) -> f64 {
        self.clock
    }

    /// Whether the last heartbeat found the lobby in blamelock.
    #[must_use]
    pub const fn blamelock(&self) -> bool {
        self.view.blamelock()
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Processes one transport event.
    ///
    /// # Errors
    ///
    /// Returns the reason an inbound message was dropped. The session state
    /// is consistent either way; callers may log and continue.
    pub fn handle_event<T: MeshTransport>(
        &mut self,
        event: MeshEvent,
        transport: &mut T,
    ) -> SyncResult<()> {
        match event {
            MeshEvent::Connected { peer, latency_ms } => {
                self.on_connected(&peer, latency_ms, transport);
                Ok(())
            }
            MeshEvent::Disconnected { peer } => {
                self.on_disconnected(&peer, transport);
                Ok(())
            }
            MeshEvent::LatencySample { peer, latency_ms } => {
                self.on_latency(&peer, latency_ms);
                Ok(())
            }
            MeshEvent::Message { peer, data } => {
                self.stats.frames_received += 1;
                let result = self.dispatch(&peer, &data, transport);
                if let Err(err) = &result {
                    self.note_drop(&peer, err);
                }
                result
            }
        }
    }

    fn note_drop(&mut self, peer: &PeerId, err: &SyncError) {
        match err {
            SyncError::Codec(_) | SyncError::Control(_) => {
                self.stats.malformed_dropped += 1;
                tracing::warn!(peer = %peer, error = %err, "dropping malformed message");
            }
            SyncError::UnknownPeer(_) => {
                self.stats.unknown_peer_drops += 1;
                tracing::debug!(peer = %peer, "dropping message from peer without state");
            }
            SyncError::Pool(_) | SyncError::Config(_) => {
                tracing::warn!(peer = %peer, error = %err, "message not applied");
            }
        }
    }

    fn on_connected<T: MeshTransport>(
        &mut self,
        peer: &PeerId,
        latency_ms: Option<f32>,
        transport: &mut T,
    ) {
        self.players += 1;
        if let Some(latency) = latency_ms {
            self.early_latency.insert(peer.clone(), latency);
        }

        let greet = ControlMessage::Greet {
            creator: self.config.creator,
            name: self.config.display_name.clone(),
        };
        self.send_control(transport, peer, &greet);
        tracing::info!(peer = %peer, players = self.players, "peer connected, greeting");
    }

    fn on_disconnected<T: MeshTransport>(&mut self, peer: &PeerId, transport: &mut T) {
        self.players = self.players.saturating_sub(1);
        self.early_latency.remove(peer);

        if self.peers.remove(peer).is_none() {
            tracing::debug!(peer = %peer, "disconnect from peer that never greeted");
            return;
        }
        let purged = self.pending.purge_peer(peer);
        self.cursors.remove(peer);

        if self.peers.refresh_local_neighbors() {
            self.send_neighbors(transport);
        }
        tracing::info!(peer = %peer, purged, "peer disconnected");
    }

    fn on_latency(&mut self, peer: &PeerId, latency_ms: f32) {
        let smoothing = self.config.latency_smoothing;
        match self.peers.get_mut(peer) {
            Some(state) => state.record_latency(latency_ms, smoothing),
            None => {
                self.early_latency.insert(peer.clone(), latency_ms);
            }
        }
    }

    fn dispatch<T: MeshTransport>(
        &mut self,
        peer: &PeerId,
        data: &[u8],
        transport: &mut T,
    ) -> SyncResult<()> {
        if ControlMessage::is_control(data) {
            return match ControlMessage::parse(data)? {
                ControlMessage::Greet { creator, name } => {
                    self.on_greet(peer, creator, name, transport)
                }
                ControlMessage::Neighbors(ids) => self.on_neighbors(peer, ids),
            };
        }

        if !self.peers.contains(peer) || peer == self.peers.local_id() {
            return Err(SyncError::UnknownPeer(peer.clone()));
        }
        let frame = Frame::decode(data)?;
        let header = *frame.header();

        match Message::decode(&frame)? {
            Message::Sync(summary) => {
                self.on_sync(peer, &header, &summary);
                Ok(())
            }
            Message::EntityAsk { index, nonce } => self.on_ask(peer, index, nonce, transport),
            Message::EntityResponse {
                index,
                nonce,
                record,
            } => self.on_response(peer, index, nonce, record),
            Message::EntityUpdate(update) => {
                self.on_update(peer, &update);
                Ok(())
            }
        }
    }

    fn on_greet<T: MeshTransport>(
        &mut self,
        peer: &PeerId,
        creator: bool,
        name: String,
        transport: &mut T,
    ) -> SyncResult<()> {
        if peer == self.peers.local_id() {
            return Err(SyncError::UnknownPeer(peer.clone()));
        }

        let mut state = PeerState::new_remote(peer.clone(), name, creator);
        state.latency_ms = self.early_latency.remove(peer);
        tracing::info!(peer = %peer, name = %state.name, creator, "peer greeted");
        self.peers.insert(state);
        self.peers.refresh_local_neighbors();

        // The newcomer needs our list even when it did not change.
        self.send_neighbors(transport);

        if self.config.force_sync_on_greet {
            self.send_sync(transport, Some(peer), Delivery::Reliable)?;
        }
        Ok(())
    }

    fn on_neighbors(&mut self, peer: &PeerId, ids: Vec<PeerId>) -> SyncResult<()> {
        let state = self
            .peers
            .get_mut(peer)
            .ok_or_else(|| SyncError::UnknownPeer(peer.clone()))?;
        tracing::debug!(peer = %peer, neighbors = ids.len(), "neighbor list received");
        state.set_neighbors(ids);
        Ok(())
    }

    fn on_sync(&mut self, peer: &PeerId, header: &FrameHeader, summary: &SyncSummary<'_>) {
        let Some(state) = self.peers.get_mut(peer) else {
            return;
        };
        if state.record_sync(header.stamp, header.index, summary) {
            tracing::trace!(
                peer = %peer,
                allocated = summary.allocated,
                guids = summary.guids,
                blames = ?summary.blames,
                "sync"
            );
        } else {
            self.stats.stale_syncs += 1;
            tracing::trace!(peer = %peer, sequence = header.index, "stale sync ignored");
        }
    }

    fn on_ask<T: MeshTransport>(
        &mut self,
        peer: &PeerId,
        index: u16,
        nonce: u16,
        transport: &mut T,
    ) -> SyncResult<()> {
        let record = self.pool.get(usize::from(index)).copied();
        self.stats.asks_answered += 1;
        let response = Message::EntityResponse {
            index,
            nonce,
            record: record.as_ref(),
        };
        self.send_message(transport, Some(peer), Delivery::Unreliable, &response)
    }

    fn on_response(
        &mut self,
        peer: &PeerId,
        index: u16,
        nonce: u16,
        record: Option<&EntityRecord>,
    ) -> SyncResult<()> {
        let key = RequestKey {
            peer: peer.clone(),
            index,
            nonce,
        };
        if !self.pending.resolve(&key) {
            self.stats.unsolicited_responses += 1;
        }

        let Some(record) = record else {
            self.stats.responses_missed += 1;
            tracing::trace!(peer = %peer, index, found = false, "entity response");
            return Ok(());
        };
        self.stats.responses_found += 1;

        match self.pool.import(record) {
            Ok(true) => {
                self.stats.records_imported += 1;
                tracing::debug!(peer = %peer, index, id = record.id, "record imported");
                Ok(())
            }
            Ok(false) => {
                self.stats.duplicates_ignored += 1;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn on_update(&mut self, peer: &PeerId, update: &EntityUpdate) {
        match self.pool.by_id_mut(update.id) {
            Some(record)
                if record.timestamp == update.timestamp
                    || stamp_newer(update.timestamp, record.timestamp) =>
            {
                record.set_position(update.field, update.position);
                record.timestamp = update.timestamp;
                self.stats.updates_applied += 1;
            }
            _ => {
                self.stats.updates_ignored += 1;
                tracing::debug!(peer = %peer, id = update.id, "entity update ignored");
            }
        }
    }

    // =========================================================================
    // Heartbeat
    // =========================================================================

    /// Advances session time by `dt` seconds, running a heartbeat when due.
    ///
    /// # Errors
    ///
    /// Propagates heartbeat failures (a SYNC that cannot be encoded).
    pub fn update<T: MeshTransport>(&mut self, dt: f64, transport: &mut T) -> SyncResult<()> {
        let interval = self.config.heartbeat_interval_secs;
        self.clock += dt;
        self.peers.local_mut().stamp += dt / interval;
        self.heartbeat_accumulator += dt;

        // Tolerate float drift from repeated fractional steps.
        if self.heartbeat_accumulator + 1e-9 >= interval {
            self.heartbeat_accumulator = (self.heartbeat_accumulator - interval).max(0.0);
            self.heartbeat(transport)?;
        }
        Ok(())
    }

    /// Runs one heartbeat now.
    ///
    /// # Errors
    ///
    /// [`SyncError::Codec`] if the blame vector does not fit any size class.
    pub fn heartbeat<T: MeshTransport>(&mut self, transport: &mut T) -> SyncResult<()> {
        self.stats.heartbeats += 1;
        self.refresh_local_counters();
        self.retry_expired(transport)?;

        let leader = transport.leader();
        let previous = LobbyView::evaluate(&self.peers, leader.as_ref(), self.rule);
        let blames = local_blames(&self.peers, &previous);
        if blames != self.peers.local().blames {
            tracing::debug!(blames = ?blames, "local blame vector changed");
        }
        self.peers.local_mut().set_blames(&blames);

        let view = LobbyView::evaluate(&self.peers, leader.as_ref(), self.rule);
        if view.blamelock() != self.view.blamelock() {
            tracing::info!(
                blamelock = view.blamelock(),
                blamed = view.blamed_count(),
                players = view.players(),
                leader = ?leader,
                "blamelock changed"
            );
        }
        self.view = view;

        self.reconcile(transport)?;
        self.send_sync(transport, None, Delivery::Unreliable)
    }

    fn refresh_local_counters(&mut self) {
        let allocated = u16::try_from(self.pool.allocated()).unwrap_or(u16::MAX);
        let guids = self.pool.guids();
        let local = self.peers.local_mut();
        local.entities_count = allocated;
        local.guids = guids;
    }

    fn retry_expired<T: MeshTransport>(&mut self, transport: &mut T) -> SyncResult<()> {
        for expiry in self.pending.expire(self.clock) {
            match expiry {
                Expiry::Retry(key) => {
                    self.stats.requests_retried += 1;
                    self.send_ask(transport, &key)?;
                }
                Expiry::GiveUp(key) => {
                    self.stats.requests_expired += 1;
                    tracing::debug!(peer = %key.peer, index = key.index, "ask abandoned");
                }
            }
        }
        Ok(())
    }

    /// Pulls records from every blamed neighbor and the exempt leader.
    fn reconcile<T: MeshTransport>(&mut self, transport: &mut T) -> SyncResult<()> {
        let local_id = self.peers.local_id().clone();
        let targets: Vec<PeerId> = self
            .view
            .roles()
            .filter(|(id, role)| **id != local_id && role.pulls_records())
            .map(|(id, _)| id.clone())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let span = self
            .peers
            .local()
            .neighbors
            .iter()
            .filter_map(|id| self.peers.get(id))
            .map(|peer| peer.entities_count)
            .max()
            .unwrap_or(0);

        for target in targets {
            if let Some(reported) = self.peers.get(&target).map(|peer| peer.guids) {
                self.pool.raise_guids(reported);
            }
            if span == 0 {
                continue;
            }

            let budget = self.config.max_asks_per_tick.min(span);
            let mut cursor = self.cursors.get(&target).copied().unwrap_or(0) % span;
            let mut asked = 0u16;
            for _ in 0..budget {
                let index = cursor;
                cursor = (cursor + 1) % span;
                if self.pending.contains_index(&target, index) {
                    continue;
                }
                let key = self.pending.issue(target.clone(), index, self.clock);
                self.send_ask(transport, &key)?;
                asked += 1;
            }
            if asked > 0 {
                tracing::debug!(peer = %target, asked, next = cursor, span, "reconciling");
            }
            self.cursors.insert(target, cursor);
        }
        Ok(())
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Overwrites one position of a local record and pushes it to every peer.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownEntity`] if no live record has `id`.
    pub fn push_update<T: MeshTransport>(
        &mut self,
        id: u16,
        field: RecordField,
        position: [f32; 4],
        transport: &mut T,
    ) -> SyncResult<()> {
        let record = self
            .pool
            .by_id_mut(id)
            .ok_or(PoolError::UnknownEntity(id))?;
        record.set_position(field, position);
        record.timestamp = record.timestamp.wrapping_add(1);

        let update = Message::EntityUpdate(EntityUpdate {
            id,
            field,
            timestamp: record.timestamp,
            position,
        });
        self.send_message(transport, None, Delivery::Reliable, &update)
    }

    fn send_ask<T: MeshTransport>(&mut self, transport: &mut T, key: &RequestKey) -> SyncResult<()> {
        self.stats.asks_issued += 1;
        let ask = Message::EntityAsk {
            index: key.index,
            nonce: key.nonce,
        };
        self.send_message(transport, Some(&key.peer), Delivery::Unreliable, &ask)
    }

    fn send_sync<T: MeshTransport>(
        &mut self,
        transport: &mut T,
        to: Option<&PeerId>,
        delivery: Delivery,
    ) -> SyncResult<()> {
        self.refresh_local_counters();
        let local = self.peers.local();
        let blames = local.blames.clone();
        let sync = Message::Sync(SyncSummary {
            allocated: local.entities_count,
            guids: local.guids,
            blames: &blames,
        });
        self.send_message(transport, to, delivery, &sync)
    }

    fn send_message<T: MeshTransport>(
        &mut self,
        transport: &mut T,
        to: Option<&PeerId>,
        delivery: Delivery,
        message: &Message<'_>,
    ) -> SyncResult<()> {
        let local = self.peers.local_mut();
        let sequence = local.next_sequence();
        let frame = message.encode(local.wire_stamp(), sequence)?;

        match to {
            Some(peer) => transport.send(peer, delivery, frame.as_bytes()),
            None => transport.broadcast(delivery, frame.as_bytes()),
        }
        self.stats.frames_sent += 1;
        Ok(())
    }

    fn send_control<T: MeshTransport>(
        &mut self,
        transport: &mut T,
        to: &PeerId,
        message: &ControlMessage,
    ) {
        transport.send(to, Delivery::Reliable, message.encode().as_bytes());
        self.stats.frames_sent += 1;
    }

    /// Sends the local neighbor list to every greeted peer.
    fn send_neighbors<T: MeshTransport>(&mut self, transport: &mut T) {
        let message = ControlMessage::Neighbors(self.peers.local().neighbors.clone());
        for peer in self.peers.remote_ids() {
            self.send_control(transport, &peer, &message);
        }
    }
}
