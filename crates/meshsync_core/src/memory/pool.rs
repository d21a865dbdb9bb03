//! # Entity Pool
//!
//! Dense, pre-allocated arena of [`EntityRecord`]s.

use std::collections::HashMap;

use super::record::EntityRecord;
use crate::error::{PoolError, PoolResult};

/// Largest capacity a pool can have. Slot indices travel as `u16`.
pub const MAX_CAPACITY: usize = u16::MAX as usize + 1;

/// A dense arena of entity records.
///
/// Live records always occupy slots `0..allocated`. Freeing a record moves
/// the last live record into the hole (swap-remove), so `history[i]` is the
/// id of the record whose `index == i` at all times.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. The session owns it; wrap the session in a
/// mutex to reach it from other threads.
///
/// # Example
///
/// ```rust
/// use meshsync_core::EntityPool;
///
/// let mut pool = EntityPool::new(16);
///
/// // Allocate - O(1), no heap allocation
/// let a = pool.allocate().unwrap().id;
/// let b = pool.allocate().unwrap().id;
///
/// // Free - O(1), `b` moves into slot 0
/// pool.free(a).unwrap();
/// assert_eq!(pool.get(0).unwrap().id, b);
/// ```
pub struct EntityPool {
    /// The storage array, `capacity` records long.
    records: Box<[EntityRecord]>,
    /// Live ids in slot order.
    history: Vec<u16>,
    /// id -> slot.
    slots: HashMap<u16, usize>,
    /// Next id to assign.
    guids: u16,
    /// Number of live records.
    allocated: usize,
}

impl EntityPool {
    /// Creates a new pool with the specified capacity.
    ///
    /// All record memory is pre-allocated upfront.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or larger than [`MAX_CAPACITY`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity <= MAX_CAPACITY,
            "Capacity must be in 1..={MAX_CAPACITY}"
        );

        Self {
            records: vec![EntityRecord::default(); capacity].into_boxed_slice(),
            history: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
            guids: 0,
            allocated: 0,
        }
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Returns the number of live records.
    #[inline]
    #[must_use]
    pub const fn allocated(&self) -> usize {
        self.allocated
    }

    /// Returns true if every slot is live.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.allocated >= self.capacity()
    }

    /// Returns the next id this pool will assign.
    #[inline]
    #[must_use]
    pub const fn guids(&self) -> u16 {
        self.guids
    }

    /// Raises the id counter to at least `at_least`. Never lowers it.
    #[inline]
    pub fn raise_guids(&mut self, at_least: u16) {
        self.guids = self.guids.max(at_least);
    }

    /// Live ids in slot order. Position in this slice is the wire-visible index.
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[u16] {
        &self.history
    }

    /// Allocates a record with the next id in the next free slot.
    ///
    /// # Errors
    ///
    /// [`PoolError::PoolExhausted`] at capacity, [`PoolError::IdSpaceExhausted`]
    /// when the id counter cannot advance.
    pub fn allocate(&mut self) -> PoolResult<&mut EntityRecord> {
        if self.is_full() {
            return Err(PoolError::PoolExhausted {
                capacity: self.capacity(),
            });
        }

        let id = self.guids;
        self.guids = id.checked_add(1).ok_or(PoolError::IdSpaceExhausted)?;

        let index = self.allocated;
        self.records[index] = EntityRecord::new(id, slot_u16(index));
        self.push_live(id, index);

        Ok(&mut self.records[index])
    }

    /// Frees the record with `id`, moving the last live record into its slot.
    ///
    /// Returns a copy of the freed record with the disposed flag set. Only the
    /// relocated record's `index` changes; every other live record keeps its
    /// bytes.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownEntity`] if no live record has this id.
    pub fn free(&mut self, id: u16) -> PoolResult<EntityRecord> {
        let slot = self.slots.remove(&id).ok_or(PoolError::UnknownEntity(id))?;

        let mut freed = self.records[slot];
        freed.flags |= EntityRecord::FLAG_DISPOSED;
        freed.flags &= !EntityRecord::FLAG_ALLOCATED;

        let last = self.allocated - 1;
        if slot != last {
            self.copy(last, slot)?;
            self.records[slot].index = slot_u16(slot);
            let moved = self.history[last];
            self.history[slot] = moved;
            self.slots.insert(moved, slot);
        }

        self.history.pop();
        self.records[last] = EntityRecord::default();
        self.allocated = last;

        Ok(freed)
    }

    /// Raw byte copy of one full record from slot `src` to slot `dst`.
    ///
    /// Bookkeeping (`history`, the id map) is the caller's business.
    ///
    /// # Errors
    ///
    /// [`PoolError::IndexOutOfRange`] if either slot is outside the arena.
    pub fn copy(&mut self, src: usize, dst: usize) -> PoolResult<()> {
        let capacity = self.capacity();
        for index in [src, dst] {
            if index >= capacity {
                return Err(PoolError::IndexOutOfRange { index, capacity });
            }
        }
        self.records.copy_within(src..=src, dst);
        Ok(())
    }

    /// Imports a record learned from another peer.
    ///
    /// First-seen wins: if a record with the same id is already live, nothing
    /// changes and `Ok(false)` is returned. Otherwise the whole record is
    /// copied into the next free slot, its `index` is rewritten to that slot
    /// and the id counter is raised past its id.
    ///
    /// # Errors
    ///
    /// [`PoolError::PoolExhausted`] if the record is new and the pool is full.
    pub fn import(&mut self, record: &EntityRecord) -> PoolResult<bool> {
        if self.slots.contains_key(&record.id) {
            return Ok(false);
        }
        if self.is_full() {
            return Err(PoolError::PoolExhausted {
                capacity: self.capacity(),
            });
        }

        let index = self.allocated;
        self.records[index] = *record;
        self.records[index].index = slot_u16(index);
        self.push_live(record.id, index);
        self.raise_guids(record.id.saturating_add(1));

        Ok(true)
    }

    /// Gets the live record at slot `index`. O(1).
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&EntityRecord> {
        self.records[..self.allocated].get(index)
    }

    /// Gets a mutable live record at slot `index`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut EntityRecord> {
        self.records[..self.allocated].get_mut(index)
    }

    /// Returns the slot currently holding `id`.
    #[inline]
    #[must_use]
    pub fn index_of(&self, id: u16) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    /// Returns true if a live record has this id.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: u16) -> bool {
        self.slots.contains_key(&id)
    }

    /// Gets a live record by id.
    #[must_use]
    pub fn by_id(&self, id: u16) -> Option<&EntityRecord> {
        self.index_of(id).map(|index| &self.records[index])
    }

    /// Gets a mutable live record by id.
    pub fn by_id_mut(&mut self, id: u16) -> Option<&mut EntityRecord> {
        let index = self.index_of(id)?;
        Some(&mut self.records[index])
    }

    /// Iterates over live records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records[..self.allocated].iter()
    }

    /// The live region of the arena as raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records[..self.allocated])
    }

    /// Frees every record. The id counter is kept so ids are never reused.
    pub fn clear(&mut self) {
        self.records[..self.allocated].fill(EntityRecord::default());
        self.history.clear();
        self.slots.clear();
        self.allocated = 0;
    }

    fn push_live(&mut self, id: u16, index: usize) {
        self.history.push(id);
        self.slots.insert(id, index);
        self.allocated += 1;
    }
}

/// Slot indices are bounded by [`MAX_CAPACITY`], so they always fit.
#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn slot_u16(index: usize) -> u16 {
    index as u16
}
