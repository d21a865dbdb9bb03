//! # Wire Protocol
//!
//! Binary frames for high-frequency traffic, text for control traffic.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (12 bytes)                                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Kind (1) │ Subtype (1) │ Stamp (2) │ Index (2) │ Tags (3 x 2) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (24 / 44 / 48 / 96 bytes, fixed per size class)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The payload carries no type information of its own. The receiver picks
//! the view (`f32` triples, `u16` slots, `u8` slots or a whole entity record)
//! from the header's kind and subtype.
//!
//! ## Byte Order
//!
//! Frames are the in-memory image of their `Pod` structs, which is
//! little-endian on every supported target.

#[cfg(target_endian = "big")]
compile_error!("meshsync frames are little-endian images of Pod structs");

mod control;
mod packets;
mod serialization;

pub use control::{ControlError, ControlMessage, SENTINEL};
pub use packets::{
    stamp_newer, CodecError, EntitySubtype, Frame, FrameHeader, MessageKind, SizeClass,
};
pub use serialization::{EntityUpdate, Message, SyncSummary};
