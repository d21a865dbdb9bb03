//! # Entity Record
//!
//! One networked object's replicable state, exactly 44 bytes on every peer.
//!
//! ```text
//! ┌────┬───────┬──────┬──────┬───────────┬───────┬──────────────┬──────────────┐
//! │ id │ index │ kind │ seed │ timestamp │ flags │ position A   │ position B   │
//! │ 2  │ 2     │ 2    │ 2    │ 2         │ 2     │ 4 x f32 (16) │ 4 x f32 (16) │
//! └────┴───────┴──────┴──────┴───────────┴───────┴──────────────┴──────────────┘
//! ```
//!
//! The two positions are an interpolation pair for collaborators. This crate
//! only moves their bytes.

use bytemuck::{Pod, Zeroable};

/// Replicated state of one networked object.
///
/// Size: 44 bytes, no padding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct EntityRecord {
    /// Lobby-wide id, assigned from the owning pool's guid counter.
    pub id: u16,
    /// Current slot in the owning pool. Rewritten on swap-remove and import.
    pub index: u16,
    /// Peer-chosen type tag, opaque to the sync layer.
    pub kind: u16,
    /// Peer-chosen seed, opaque to the sync layer.
    pub seed: u16,
    /// Logical tick of the last update.
    pub timestamp: u16,
    /// Status bits, see [`EntityRecord::FLAG_ALLOCATED`] and friends.
    pub flags: u16,
    /// First position of the interpolation pair.
    pub position_a: [f32; 4],
    /// Second position of the interpolation pair.
    pub position_b: [f32; 4],
}

/// Which position of a record an out-of-band update targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordField {
    /// [`EntityRecord::position_a`].
    PositionA = 0,
    /// [`EntityRecord::position_b`].
    PositionB = 1,
}

impl RecordField {
    /// Decodes a wire selector.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::PositionA),
            1 => Some(Self::PositionB),
            _ => None,
        }
    }
}

impl EntityRecord {
    /// Size in bytes.
    pub const SIZE: usize = 44;

    /// Flag: slot holds a live record.
    pub const FLAG_ALLOCATED: u16 = 1 << 0;
    /// Flag: collaborators finished setting the record up.
    pub const FLAG_INITIALIZED: u16 = 1 << 1;
    /// Flag: record was freed.
    pub const FLAG_DISPOSED: u16 = 1 << 2;

    /// Creates a freshly allocated record.
    #[inline]
    #[must_use]
    pub const fn new(id: u16, index: u16) -> Self {
        Self {
            id,
            index,
            kind: 0,
            seed: 0,
            timestamp: 0,
            flags: Self::FLAG_ALLOCATED,
            position_a: [0.0; 4],
            position_b: [0.0; 4],
        }
    }

    /// Returns true if the allocated flag is set.
    #[inline]
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.flags & Self::FLAG_ALLOCATED != 0
    }

    /// Returns true if the initialized flag is set.
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.flags & Self::FLAG_INITIALIZED != 0
    }

    /// Returns true if the disposed flag is set.
    #[inline]
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        self.flags & Self::FLAG_DISPOSED != 0
    }

    /// Reads one of the two positions.
    #[inline]
    #[must_use]
    pub const fn position(&self, field: RecordField) -> [f32; 4] {
        match field {
            RecordField::PositionA => self.position_a,
            RecordField::PositionB => self.position_b,
        }
    }

    /// Overwrites one of the two positions.
    #[inline]
    pub fn set_position(&mut self, field: RecordField, value: [f32; 4]) {
        match field {
            RecordField::PositionA => self.position_a = value,
            RecordField::PositionB => self.position_b = value,
        }
    }

    /// The record's wire bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads a record from wire bytes. `None` unless exactly 44 bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<EntityRecord>(), EntityRecord::SIZE);
        assert_eq!(std::mem::align_of::<EntityRecord>(), 4);
    }

    #[test]
    fn test_flags() {
        let mut record = EntityRecord::new(7, 0);
        assert!(record.is_allocated());
        assert!(!record.is_initialized());
        assert!(!record.is_disposed());

        record.flags |= EntityRecord::FLAG_DISPOSED;
        assert!(record.is_disposed());
    }

    #[test]
    fn test_position_fields() {
        let mut record = EntityRecord::new(1, 0);
        record.set_position(RecordField::PositionB, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(record.position(RecordField::PositionB), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(record.position(RecordField::PositionA), [0.0; 4]);
    }

    #[test]
    fn test_bytes_reproduce_record() {
        let mut record = EntityRecord::new(0xBEEF, 3);
        record.kind = 9;
        record.seed = 0x1234;
        record.timestamp = 65535;
        record.position_a = [0.5, -1.5, 1e6, f32::MIN_POSITIVE];

        let bytes = record.as_bytes().to_vec();
        assert_eq!(bytes.len(), EntityRecord::SIZE);
        let back = EntityRecord::from_bytes(&bytes).unwrap();
        assert_eq!(back.as_bytes(), &bytes[..]);
        assert!(EntityRecord::from_bytes(&bytes[..43]).is_none());
    }

    #[test]
    fn test_field_selector() {
        assert_eq!(RecordField::from_u16(0), Some(RecordField::PositionA));
        assert_eq!(RecordField::from_u16(1), Some(RecordField::PositionB));
        assert_eq!(RecordField::from_u16(2), None);
    }
}
