//! # Frame Definitions
//!
//! The shared header, the fixed size classes and the [`Frame`] buffer whose
//! payload is read through several typed views.
//!
//! ## Zero-Copy Design
//!
//! A frame is one word-aligned buffer. The header and every payload view are
//! `bytemuck` casts over that buffer:
//! - No serialize/deserialize step for payloads
//! - No allocation per frame (`Frame` is `Copy`, 112 bytes)
//! - A received frame is one copy out of the transport buffer

use bytemuck::{Pod, Zeroable};
use meshsync_core::EntityRecord;
use thiserror::Error;

/// Errors raised while decoding or building binary frames.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Frame length does not fit the declared message.
    #[error("malformed frame ({len} bytes): {reason}")]
    MalformedFrame {
        /// Received length in bytes.
        len: usize,
        /// What was wrong.
        reason: &'static str,
    },

    /// Header kind byte is not a known message kind.
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(u8),

    /// Subtype byte is not valid for the kind.
    #[error("bad subtype {subtype} for {kind:?}")]
    BadSubtype {
        /// Message kind from the header.
        kind: MessageKind,
        /// Offending subtype byte.
        subtype: u8,
    },

    /// Record field selector of an update is unknown.
    #[error("bad record field selector: {0}")]
    BadField(u16),

    /// A text-protocol kind arrived inside a binary frame.
    #[error("{0:?} is a text control message, not a binary frame")]
    NotBinary(MessageKind),

    /// Message content does not fit the largest size class.
    #[error("payload of {needed} bytes exceeds {available} bytes")]
    PayloadOverflow {
        /// Bytes the message needs.
        needed: usize,
        /// Bytes the largest class offers.
        available: usize,
    },
}

/// Message kinds. Numeric values are part of the wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Text: hello with display name. Reliable.
    Greet = 0,
    /// Binary: heartbeat summary and blame vector. Unreliable.
    Sync = 1,
    /// Text: the sender's neighbor ids. Reliable.
    Neighbors = 2,
    /// Binary: reconciliation ask / response.
    Entity = 3,
    /// Binary: out-of-band push of one record field.
    EntityUpdate = 4,
}

impl MessageKind {
    /// Decodes a header kind byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Greet),
            1 => Some(Self::Sync),
            2 => Some(Self::Neighbors),
            3 => Some(Self::Entity),
            4 => Some(Self::EntityUpdate),
            _ => None,
        }
    }

    /// Returns true for kinds carried by the text control protocol.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Greet | Self::Neighbors)
    }
}

/// Subtypes of [`MessageKind::Entity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntitySubtype {
    /// "Send me the record at pool index N."
    Ask = 0,
    /// The record at that index, or a miss.
    Response = 1,
}

impl EntitySubtype {
    /// Decodes a header subtype byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ask),
            1 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Frame header - present in every binary frame.
///
/// Total size: 12 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameHeader {
    /// [`MessageKind`] byte.
    pub kind: u8,
    /// Ask/response or other sub-kind.
    pub subtype: u8,
    /// Sender's logical time, wraps at 65536.
    pub stamp: u16,
    /// Sender's outgoing sequence counter, wraps at 65536.
    pub index: u16,
    /// Generic slots, meaning chosen per kind.
    pub tags: [u16; 3],
}

impl FrameHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 12;
}

/// The fixed frame lengths. Ordered by payload length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeClass {
    /// 24-byte payload: 2 float triples, 12 `u16`, 24 `u8`.
    Small,
    /// 44-byte payload: exactly one [`EntityRecord`].
    Entity,
    /// 48-byte payload.
    Medium,
    /// 96-byte payload.
    Large,
}

impl SizeClass {
    /// Every class, smallest payload first.
    pub const ALL: [Self; 4] = [Self::Small, Self::Entity, Self::Medium, Self::Large];

    /// Payload length in bytes.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Small => 24,
            Self::Entity => EntityRecord::SIZE,
            Self::Medium => 48,
            Self::Large => 96,
        }
    }

    /// Whole frame length in bytes.
    #[must_use]
    pub const fn frame_len(self) -> usize {
        FrameHeader::SIZE + self.payload_len()
    }

    /// The class a received frame belongs to, from its length alone.
    #[must_use]
    pub fn from_frame_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.frame_len() == len)
    }

    /// The smallest class whose payload holds `len` bytes.
    #[must_use]
    pub fn smallest_fitting(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.payload_len() >= len)
    }

    /// Default class of a message: entity responses carry a whole record,
    /// everything else fits the smallest class.
    #[must_use]
    pub const fn for_message(kind: MessageKind, subtype: u8) -> Self {
        if matches!(kind, MessageKind::Entity) && subtype == EntitySubtype::Response as u8 {
            Self::Entity
        } else {
            Self::Small
        }
    }
}

/// Wrap-safe "is `a` newer than `b`" for 16-bit stamps and sequences.
#[inline]
#[must_use]
pub const fn stamp_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

const HEADER_WORDS: usize = FrameHeader::SIZE / 4;
const MAX_FRAME_WORDS: usize = SizeClass::Large.frame_len() / 4;

/// One binary frame.
///
/// Backed by `u32` words so every view (`f32`, `u16`, [`EntityRecord`]) is
/// correctly aligned and casting never copies.
#[derive(Clone, Copy)]
pub struct Frame {
    words: [u32; MAX_FRAME_WORDS],
    class: SizeClass,
}

impl Frame {
    /// Creates a zeroed frame of the given class.
    #[must_use]
    pub const fn new(class: SizeClass) -> Self {
        Self {
            words: [0; MAX_FRAME_WORDS],
            class,
        }
    }

    /// Creates a frame with its header already filled in.
    #[must_use]
    pub fn with_header(class: SizeClass, header: FrameHeader) -> Self {
        let mut frame = Self::new(class);
        *frame.header_mut() = header;
        frame
    }

    /// Copies received bytes into a frame.
    ///
    /// The length selects the size class. Frames shorter than the header,
    /// lengths that match no class and classes too small for the declared
    /// kind are rejected; nothing here can panic on hostile input.
    ///
    /// # Errors
    ///
    /// [`CodecError::MalformedFrame`] or [`CodecError::UnknownMessageKind`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let len = bytes.len();
        if len < FrameHeader::SIZE {
            return Err(CodecError::MalformedFrame {
                len,
                reason: "shorter than the frame header",
            });
        }
        let class = SizeClass::from_frame_len(len).ok_or(CodecError::MalformedFrame {
            len,
            reason: "length matches no size class",
        })?;

        let mut frame = Self::new(class);
        frame.as_bytes_mut().copy_from_slice(bytes);

        let header = frame.header();
        let kind = MessageKind::from_u8(header.kind)
            .ok_or(CodecError::UnknownMessageKind(header.kind))?;
        let required = SizeClass::for_message(kind, header.subtype);
        if class.payload_len() < required.payload_len() {
            return Err(CodecError::MalformedFrame {
                len,
                reason: "too short for its message kind",
            });
        }

        Ok(frame)
    }

    /// The size class.
    #[inline]
    #[must_use]
    pub const fn class(&self) -> SizeClass {
        self.class
    }

    /// Frame length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.class.frame_len()
    }

    /// Always false; every class has a header.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// The frame's wire bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.len();
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..len]
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..len]
    }

    /// The header view.
    #[inline]
    #[must_use]
    pub fn header(&self) -> &FrameHeader {
        bytemuck::from_bytes(&self.as_bytes()[..FrameHeader::SIZE])
    }

    /// Mutable header view.
    #[inline]
    pub fn header_mut(&mut self) -> &mut FrameHeader {
        bytemuck::from_bytes_mut(&mut self.as_bytes_mut()[..FrameHeader::SIZE])
    }

    /// Kind from the header, if known.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_u8(self.header().kind)
    }

    fn payload_words(&self) -> &[u32] {
        let end = HEADER_WORDS + self.class.payload_len() / 4;
        &self.words[HEADER_WORDS..end]
    }

    fn payload_words_mut(&mut self) -> &mut [u32] {
        let end = HEADER_WORDS + self.class.payload_len() / 4;
        &mut self.words[HEADER_WORDS..end]
    }

    /// Payload as 8-bit slots.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        bytemuck::cast_slice(self.payload_words())
    }

    /// Mutable payload as 8-bit slots.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.payload_words_mut())
    }

    /// Payload as 16-bit slots.
    #[inline]
    #[must_use]
    pub fn slots16(&self) -> &[u16] {
        bytemuck::cast_slice(self.payload_words())
    }

    /// Mutable payload as 16-bit slots.
    #[inline]
    pub fn slots16_mut(&mut self) -> &mut [u16] {
        bytemuck::cast_slice_mut(self.payload_words_mut())
    }

    /// Payload as 32-bit floats.
    #[inline]
    #[must_use]
    pub fn floats(&self) -> &[f32] {
        bytemuck::cast_slice(self.payload_words())
    }

    /// Mutable payload as 32-bit floats.
    #[inline]
    pub fn floats_mut(&mut self) -> &mut [f32] {
        bytemuck::cast_slice_mut(self.payload_words_mut())
    }

    /// The `n`th float triple of the payload.
    #[must_use]
    pub fn float_triple(&self, n: usize) -> Option<[f32; 3]> {
        let triple = self.floats().chunks_exact(3).nth(n)?;
        Some([triple[0], triple[1], triple[2]])
    }

    /// Writes the `n`th float triple. Returns false if it does not fit.
    pub fn set_float_triple(&mut self, n: usize, value: [f32; 3]) -> bool {
        match self.floats_mut().chunks_exact_mut(3).nth(n) {
            Some(triple) => {
                triple.copy_from_slice(&value);
                true
            }
            None => false,
        }
    }

    /// Payload as an entity record, if the class is large enough.
    #[must_use]
    pub fn record(&self) -> Option<&EntityRecord> {
        let bytes = self.payload().get(..EntityRecord::SIZE)?;
        bytemuck::try_from_bytes(bytes).ok()
    }

    /// Mutable payload as an entity record, if the class is large enough.
    pub fn record_mut(&mut self) -> Option<&mut EntityRecord> {
        let bytes = self.payload_mut().get_mut(..EntityRecord::SIZE)?;
        bytemuck::try_from_bytes_mut(bytes).ok()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Frame {}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("class", &self.class)
            .field("header", self.header())
            .finish_non_exhaustive()
    }
}
