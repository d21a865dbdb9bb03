//! # Pending Requests
//!
//! Outstanding ENTITY/ASKs with an expiry and a bounded retry budget, so a
//! lost ask or response never stalls reconciliation.

use std::collections::BTreeMap;

use crate::transport::PeerId;

/// Identity of one outstanding ask.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    /// Peer that was asked.
    pub peer: PeerId,
    /// Pool index asked for.
    pub index: u16,
    /// Nonce echoed by the response.
    pub nonce: u16,
}

/// What to do about a request whose timer ran out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// Send the ask again. The key is unchanged.
    Retry(RequestKey),
    /// Retry budget spent. The entry is gone.
    GiveUp(RequestKey),
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    issued_at: f64,
    retries: u8,
}

/// Table of outstanding asks.
#[derive(Clone, Debug)]
pub struct PendingRequests {
    entries: BTreeMap<RequestKey, Entry>,
    timeout_secs: f64,
    max_retries: u8,
    next_nonce: u16,
}

impl PendingRequests {
    /// Creates an empty table.
    #[must_use]
    pub fn new(timeout_secs: f64, max_retries: u8) -> Self {
        Self {
            entries: BTreeMap::new(),
            timeout_secs,
            max_retries,
            next_nonce: 0,
        }
    }

    /// Registers a new ask and returns its key.
    pub fn issue(&mut self, peer: PeerId, index: u16, now: f64) -> RequestKey {
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1);

        let key = RequestKey { peer, index, nonce };
        self.entries.insert(
            key.clone(),
            Entry {
                issued_at: now,
                retries: 0,
            },
        );
        key
    }

    /// Removes the entry a response answers. Returns false if none matched.
    pub fn resolve(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Collects every request older than the timeout.
    ///
    /// Requests with retries left are re-armed at `now`; the rest are dropped.
    pub fn expire(&mut self, now: f64) -> Vec<Expiry> {
        let mut expired = Vec::new();
        let timeout = self.timeout_secs;
        let max_retries = self.max_retries;

        self.entries.retain(|key, entry| {
            if now - entry.issued_at < timeout {
                return true;
            }
            if entry.retries < max_retries {
                entry.retries += 1;
                entry.issued_at = now;
                expired.push(Expiry::Retry(key.clone()));
                true
            } else {
                expired.push(Expiry::GiveUp(key.clone()));
                false
            }
        });

        expired
    }

    /// Drops every request to `peer`. Returns how many were dropped.
    pub fn purge_peer(&mut self, peer: &PeerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.peer != *peer);
        before - self.entries.len()
    }

    /// Whether `peer` already has an outstanding ask for `index`.
    #[must_use]
    pub fn contains_index(&self, peer: &PeerId, index: u16) -> bool {
        self.entries
            .keys()
            .any(|key| key.peer == *peer && key.index == index)
    }

    /// Number of outstanding asks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
