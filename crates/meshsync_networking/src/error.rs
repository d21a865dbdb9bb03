//! # Sync Error Types
//!
//! Every fault in this crate degrades to "this peer's view stays stale a bit
//! longer". Nothing here is fatal to the process.

use thiserror::Error;

use crate::protocol::{CodecError, ControlError};
use crate::transport::PeerId;
use meshsync_core::PoolError;

/// Errors surfaced by the session and its collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Entity pool refused an operation.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A binary frame could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A text control message could not be parsed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// A data message arrived from a peer that never greeted (or has left).
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// Configuration failed validation or could not be read.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for session operations.
pub type SyncResult<T> = Result<T, SyncError>;
