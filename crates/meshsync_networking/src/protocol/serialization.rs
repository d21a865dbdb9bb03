//! # Message Serialization
//!
//! Typed messages over [`Frame`]s.
//!
//! ## Tag Usage
//!
//! ```text
//! kind            subtype   tags[0]      tags[1]   tags[2]      payload
//! SYNC            0         allocated    guids     blame count  u8 blames
//! ENTITY          ASK       pool index   nonce     0            -
//! ENTITY          RESPONSE  pool index   nonce     found (0/1)  record bytes
//! ENTITY_UPDATE   0         record id    field     timestamp    f32 x 4
//! ```
//!
//! Decoded messages borrow from the frame, so reading a SYNC blame vector or
//! a RESPONSE record never copies.

use meshsync_core::{EntityRecord, RecordField};

use super::packets::{CodecError, EntitySubtype, Frame, MessageKind, SizeClass};

/// Heartbeat summary of the sender's pool and its verdict on its neighbors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSummary<'a> {
    /// Live records in the sender's pool.
    pub allocated: u16,
    /// Sender's id counter.
    pub guids: u16,
    /// One byte per neighbor, in the sender's NEIGHBORS order. 1 = blamed.
    pub blames: &'a [u8],
}

/// Out-of-band push of one record position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityUpdate {
    /// Target record id.
    pub id: u16,
    /// Which position is overwritten.
    pub field: RecordField,
    /// Sender's record timestamp; older updates are ignored.
    pub timestamp: u16,
    /// New value.
    pub position: [f32; 4],
}

/// A decoded binary message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message<'a> {
    /// Heartbeat.
    Sync(SyncSummary<'a>),
    /// Request for the record at a pool index.
    EntityAsk {
        /// Pool index asked for.
        index: u16,
        /// Echoed back in the response.
        nonce: u16,
    },
    /// Answer to an ask. `record` is `None` when the index was empty.
    EntityResponse {
        /// Pool index that was asked for.
        index: u16,
        /// Nonce of the ask.
        nonce: u16,
        /// The record, if the slot was live.
        record: Option<&'a EntityRecord>,
    },
    /// Out-of-band record update.
    EntityUpdate(EntityUpdate),
}

impl<'a> Message<'a> {
    /// Header kind of the message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Sync(_) => MessageKind::Sync,
            Self::EntityAsk { .. } | Self::EntityResponse { .. } => MessageKind::Entity,
            Self::EntityUpdate(_) => MessageKind::EntityUpdate,
        }
    }

    /// Header subtype of the message.
    #[must_use]
    pub const fn subtype(&self) -> u8 {
        match self {
            Self::EntityAsk { .. } => EntitySubtype::Ask as u8,
            Self::EntityResponse { .. } => EntitySubtype::Response as u8,
            Self::Sync(_) | Self::EntityUpdate(_) => 0,
        }
    }

    /// Size class the message is sent in.
    ///
    /// SYNC is promoted to the smallest class that holds its blame vector.
    ///
    /// # Errors
    ///
    /// [`CodecError::PayloadOverflow`] if the blame vector fits no class.
    pub fn class(&self) -> Result<SizeClass, CodecError> {
        match self {
            Self::Sync(summary) => {
                SizeClass::smallest_fitting(summary.blames.len()).ok_or(
                    CodecError::PayloadOverflow {
                        needed: summary.blames.len(),
                        available: SizeClass::Large.payload_len(),
                    },
                )
            }
            _ => Ok(SizeClass::for_message(self.kind(), self.subtype())),
        }
    }

    /// Builds the frame for this message.
    ///
    /// # Errors
    ///
    /// [`CodecError::PayloadOverflow`] if the message does not fit.
    pub fn encode(&self, stamp: u16, sequence: u16) -> Result<Frame, CodecError> {
        let class = self.class()?;
        let mut frame = Frame::new(class);
        {
            let header = frame.header_mut();
            header.kind = self.kind() as u8;
            header.subtype = self.subtype();
            header.stamp = stamp;
            header.index = sequence;
        }

        match self {
            Self::Sync(summary) => {
                let count = summary.blames.len();
                frame.header_mut().tags = [summary.allocated, summary.guids, wire_len(count)?];
                frame.payload_mut()[..count].copy_from_slice(summary.blames);
            }
            Self::EntityAsk { index, nonce } => {
                frame.header_mut().tags = [*index, *nonce, 0];
            }
            Self::EntityResponse {
                index,
                nonce,
                record,
            } => {
                frame.header_mut().tags = [*index, *nonce, u16::from(record.is_some())];
                if let Some(record) = record {
                    let slot = frame.record_mut().ok_or(CodecError::PayloadOverflow {
                        needed: EntityRecord::SIZE,
                        available: class.payload_len(),
                    })?;
                    *slot = **record;
                }
            }
            Self::EntityUpdate(update) => {
                frame.header_mut().tags = [update.id, update.field as u16, update.timestamp];
                frame.floats_mut()[..4].copy_from_slice(&update.position);
            }
        }

        Ok(frame)
    }

    /// Reads the message a frame carries.
    ///
    /// # Errors
    ///
    /// Fails on unknown kinds or subtypes, text kinds, out-of-range blame
    /// counts and unknown update field selectors.
    pub fn decode(frame: &'a Frame) -> Result<Self, CodecError> {
        let header = frame.header();
        let kind =
            MessageKind::from_u8(header.kind).ok_or(CodecError::UnknownMessageKind(header.kind))?;
        let [t0, t1, t2] = header.tags;

        match kind {
            MessageKind::Greet | MessageKind::Neighbors => Err(CodecError::NotBinary(kind)),
            MessageKind::Sync => {
                let blames =
                    frame
                        .payload()
                        .get(..usize::from(t2))
                        .ok_or(CodecError::MalformedFrame {
                            len: frame.len(),
                            reason: "blame count overruns the payload",
                        })?;
                Ok(Self::Sync(SyncSummary {
                    allocated: t0,
                    guids: t1,
                    blames,
                }))
            }
            MessageKind::Entity => match EntitySubtype::from_u8(header.subtype) {
                Some(EntitySubtype::Ask) => Ok(Self::EntityAsk {
                    index: t0,
                    nonce: t1,
                }),
                Some(EntitySubtype::Response) => {
                    let record = if t2 == 0 {
                        None
                    } else {
                        Some(frame.record().ok_or(CodecError::MalformedFrame {
                            len: frame.len(),
                            reason: "response too short for a record",
                        })?)
                    };
                    Ok(Self::EntityResponse {
                        index: t0,
                        nonce: t1,
                        record,
                    })
                }
                None => Err(CodecError::BadSubtype {
                    kind,
                    subtype: header.subtype,
                }),
            },
            MessageKind::EntityUpdate => {
                let field = RecordField::from_u16(t1).ok_or(CodecError::BadField(t1))?;
                let floats = frame.floats();
                Ok(Self::EntityUpdate(EntityUpdate {
                    id: t0,
                    field,
                    timestamp: t2,
                    position: [floats[0], floats[1], floats[2], floats[3]],
                }))
            }
        }
    }
}

fn wire_len(len: usize) -> Result<u16, CodecError> {
    u16::try_from(len).map_err(|_| CodecError::PayloadOverflow {
        needed: len,
        available: SizeClass::Large.payload_len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reencode(message: &Message<'_>) -> Frame {
        let frame = message.encode(7, 9).unwrap();
        Frame::decode(frame.as_bytes()).unwrap()
    }

    #[test]
    fn test_sync_carries_blames() {
        let blames = [1u8, 0, 1];
        let message = Message::Sync(SyncSummary {
            allocated: 5,
            guids: 6,
            blames: &blames,
        });
        let frame = reencode(&message);

        assert_eq!(frame.class(), SizeClass::Small);
        assert_eq!(frame.header().stamp, 7);
        assert_eq!(frame.header().index, 9);
        assert_eq!(Message::decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_sync_promotes_size_class() {
        let blames = vec![1u8; 40];
        let message = Message::Sync(SyncSummary {
            allocated: 0,
            guids: 0,
            blames: &blames,
        });
        assert_eq!(message.class().unwrap(), SizeClass::Entity);

        let blames = vec![0u8; 97];
        let message = Message::Sync(SyncSummary {
            allocated: 0,
            guids: 0,
            blames: &blames,
        });
        assert!(matches!(
            message.encode(0, 0),
            Err(CodecError::PayloadOverflow { needed: 97, .. })
        ));
    }

    #[test]
    fn test_sync_blame_count_overrun() {
        let mut frame = Frame::new(SizeClass::Small);
        frame.header_mut().kind = MessageKind::Sync as u8;
        frame.header_mut().tags = [0, 0, 25];
        assert!(matches!(
            Message::decode(&frame),
            Err(CodecError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_entity_ask_and_miss() {
        let ask = Message::EntityAsk { index: 3, nonce: 11 };
        let frame = reencode(&ask);
        assert_eq!(frame.class(), SizeClass::Small);
        assert_eq!(Message::decode(&frame).unwrap(), ask);

        let miss = Message::EntityResponse {
            index: 3,
            nonce: 11,
            record: None,
        };
        let frame = reencode(&miss);
        assert_eq!(frame.class(), SizeClass::Entity);
        assert_eq!(Message::decode(&frame).unwrap(), miss);
    }

    #[test]
    fn test_entity_response_payload_is_record() {
        let mut record = EntityRecord::new(4, 2);
        record.kind = 12;
        record.position_a = [1.0, 2.0, 3.0, 4.0];
        let message = Message::EntityResponse {
            index: 2,
            nonce: 1,
            record: Some(&record),
        };
        let frame = reencode(&message);

        assert_eq!(frame.payload(), record.as_bytes());
        assert_eq!(frame.header().tags, [2, 1, 1]);
        assert_eq!(Message::decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_entity_update() {
        let message = Message::EntityUpdate(EntityUpdate {
            id: 8,
            field: RecordField::PositionB,
            timestamp: 0xFFFF,
            position: [0.5, -1.0, 2.0, 0.0],
        });
        let frame = reencode(&message);
        assert_eq!(frame.class(), SizeClass::Small);
        assert_eq!(Message::decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_bad_update_field() {
        let mut frame = Frame::new(SizeClass::Small);
        frame.header_mut().kind = MessageKind::EntityUpdate as u8;
        frame.header_mut().tags = [1, 9, 0];
        assert_eq!(Message::decode(&frame), Err(CodecError::BadField(9)));
    }

    #[test]
    fn test_bad_entity_subtype() {
        let mut frame = Frame::new(SizeClass::Entity);
        frame.header_mut().kind = MessageKind::Entity as u8;
        frame.header_mut().subtype = 7;
        assert_eq!(
            Message::decode(&frame),
            Err(CodecError::BadSubtype {
                kind: MessageKind::Entity,
                subtype: 7
            })
        );
    }

    #[test]
    fn test_text_kind_in_binary_frame() {
        let mut frame = Frame::new(SizeClass::Small);
        frame.header_mut().kind = MessageKind::Greet as u8;
        assert_eq!(
            Message::decode(&frame),
            Err(CodecError::NotBinary(MessageKind::Greet))
        );
    }
}
