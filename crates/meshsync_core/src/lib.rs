//! # MESHSYNC Core
//!
//! The replicated entity arena shared by every peer of a lobby:
//! - A fixed 44-byte [`EntityRecord`] that is identical on every peer
//! - A dense [`EntityPool`] with O(1) "Nth live record" lookup
//! - Swap-remove deletion so pool indices stay compact
//!
//! ## Architecture Rules
//!
//! 1. **No holes** - live records always occupy slots `0..allocated`
//! 2. **Whole-record merge** - the only merge rule is a full byte copy
//! 3. **No silent wrap** - exhaustion is an error, never an index wrap
//!
//! ## Example
//!
//! ```rust
//! use meshsync_core::EntityPool;
//!
//! let mut pool = EntityPool::new(64);
//! let id = pool.allocate().unwrap().id;
//! assert_eq!(pool.history(), &[id]);
//! pool.free(id).unwrap();
//! assert_eq!(pool.allocated(), 0);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod memory;

pub use error::{PoolError, PoolResult};
pub use memory::{EntityPool, EntityRecord, RecordField};
