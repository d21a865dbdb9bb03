//! # Pool Error Types
//!
//! All errors that can occur while mutating the entity arena.

use thiserror::Error;

/// Errors that can occur in the entity pool.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot of the arena holds a live record.
    #[error("entity pool exhausted: capacity {capacity}")]
    PoolExhausted {
        /// Arena capacity in records.
        capacity: usize,
    },

    /// The 16-bit id counter has no unused value left.
    #[error("entity id space exhausted")]
    IdSpaceExhausted,

    /// No live record carries this id.
    #[error("unknown entity: {0}")]
    UnknownEntity(u16),

    /// A slot index outside the arena was addressed.
    #[error("slot {index} out of range (capacity {capacity})")]
    IndexOutOfRange {
        /// The offending slot.
        index: usize,
        /// Arena capacity in records.
        capacity: usize,
    },
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
