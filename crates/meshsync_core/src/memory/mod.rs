//! # Entity Memory
//!
//! The replicated record type and the arena that owns it.
//!
//! ## Design Philosophy
//!
//! All record memory is allocated once when the session starts. During play:
//! - No heap allocations per record
//! - Records move only by whole-record byte copies
//! - The live region is always `0..allocated`, so a pool index is a
//!   compact address another peer can ask for without knowing any ids

mod pool;
mod record;

pub use pool::{EntityPool, MAX_CAPACITY};
pub use record::{EntityRecord, RecordField};
