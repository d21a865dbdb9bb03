//! # Text Control Messages
//!
//! GREET and NEIGHBORS travel as short strings on the reliable channel:
//!
//! ```text
//! #0,1,alpha          GREET      creator flag, display name
//! #2,alpha;bravo      NEIGHBORS  the sender's neighbor ids, in blame order
//! #2,                 NEIGHBORS  nobody yet
//! ```
//!
//! The leading `#` never starts a binary frame (binary kinds are below it),
//! so one byte tells the two protocols apart.

use std::fmt::Write as _;

use thiserror::Error;

use super::packets::MessageKind;
use crate::transport::PeerId;

/// First byte of every text control message.
pub const SENTINEL: u8 = b'#';

const FIELD_SEPARATOR: char = ',';
const LIST_SEPARATOR: char = ';';

/// Errors raised while parsing text control messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Message is not valid UTF-8.
    #[error("control message is not UTF-8")]
    NotUtf8,

    /// Message does not start with the sentinel.
    #[error("control message does not start with '#'")]
    MissingSentinel,

    /// Kind field is not a number.
    #[error("control kind is not a number: {0:?}")]
    BadKind(String),

    /// Kind is not a text control kind.
    #[error("unknown control kind: {0}")]
    UnknownKind(u8),

    /// Kind is not followed by a payload.
    #[error("control message has no payload")]
    MissingPayload,

    /// Payload fields could not be read.
    #[error("bad control payload: {0:?}")]
    BadPayload(String),
}

/// A decoded text control message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Hello, sent to every newly connected peer.
    Greet {
        /// Whether the sender initialised the lobby.
        creator: bool,
        /// Display name.
        name: String,
    },
    /// The sender's neighbor list. Blame vectors index into this order.
    Neighbors(Vec<PeerId>),
}

impl ControlMessage {
    /// Returns true if `bytes` look like a text control message.
    #[inline]
    #[must_use]
    pub fn is_control(bytes: &[u8]) -> bool {
        bytes.first() == Some(&SENTINEL)
    }

    /// Header kind of the message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Greet { .. } => MessageKind::Greet,
            Self::Neighbors(_) => MessageKind::Neighbors,
        }
    }

    /// Renders the wire string.
    ///
    /// Peer ids must not contain `;`.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(32);
        out.push(char::from(SENTINEL));
        let _ = write!(out, "{}{FIELD_SEPARATOR}", self.kind() as u8);

        match self {
            Self::Greet { creator, name } => {
                let _ = write!(out, "{}{FIELD_SEPARATOR}{name}", u8::from(*creator));
            }
            Self::Neighbors(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        out.push(LIST_SEPARATOR);
                    }
                    out.push_str(id.as_str());
                }
            }
        }
        out
    }

    /// Parses a wire string.
    ///
    /// # Errors
    ///
    /// See [`ControlError`].
    pub fn parse(bytes: &[u8]) -> Result<Self, ControlError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ControlError::NotUtf8)?;
        let body = text
            .strip_prefix(char::from(SENTINEL))
            .ok_or(ControlError::MissingSentinel)?;
        let (kind, payload) = body
            .split_once(FIELD_SEPARATOR)
            .ok_or(ControlError::MissingPayload)?;
        let kind: u8 = kind
            .parse()
            .map_err(|_| ControlError::BadKind(kind.to_owned()))?;

        match MessageKind::from_u8(kind) {
            Some(MessageKind::Greet) => {
                let (creator, name) = payload
                    .split_once(FIELD_SEPARATOR)
                    .ok_or(ControlError::MissingPayload)?;
                let creator = match creator {
                    "0" => false,
                    "1" => true,
                    other => return Err(ControlError::BadPayload(other.to_owned())),
                };
                Ok(Self::Greet {
                    creator,
                    name: name.to_owned(),
                })
            }
            Some(MessageKind::Neighbors) => {
                let ids = if payload.is_empty() {
                    Vec::new()
                } else {
                    payload.split(LIST_SEPARATOR).map(PeerId::from).collect()
                };
                Ok(Self::Neighbors(ids))
            }
            _ => Err(ControlError::UnknownKind(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greet_text() {
        let greet = ControlMessage::Greet {
            creator: true,
            name: "alpha".into(),
        };
        assert_eq!(greet.encode(), "#0,1,alpha");
        assert_eq!(ControlMessage::parse(b"#0,1,alpha").unwrap(), greet);
    }

    #[test]
    fn test_greet_name_may_hold_commas() {
        let parsed = ControlMessage::parse(b"#0,0,last, first").unwrap();
        assert_eq!(
            parsed,
            ControlMessage::Greet {
                creator: false,
                name: "last, first".into()
            }
        );
    }

    #[test]
    fn test_neighbors_text() {
        let neighbors = ControlMessage::Neighbors(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(neighbors.encode(), "#2,a;b;c");
        assert_eq!(ControlMessage::parse(b"#2,a;b;c").unwrap(), neighbors);
    }

    #[test]
    fn test_empty_neighbors() {
        let empty = ControlMessage::Neighbors(Vec::new());
        assert_eq!(empty.encode(), "#2,");
        assert_eq!(ControlMessage::parse(b"#2,").unwrap(), empty);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ControlMessage::parse(&[0xFF, 0xFE]), Err(ControlError::NotUtf8));
        assert_eq!(ControlMessage::parse(b"0,1,a"), Err(ControlError::MissingSentinel));
        assert_eq!(ControlMessage::parse(b"#0"), Err(ControlError::MissingPayload));
        assert_eq!(
            ControlMessage::parse(b"#x,1"),
            Err(ControlError::BadKind("x".into()))
        );
        assert_eq!(ControlMessage::parse(b"#1,5"), Err(ControlError::UnknownKind(1)));
        assert_eq!(ControlMessage::parse(b"#0,1"), Err(ControlError::MissingPayload));
        assert_eq!(
            ControlMessage::parse(b"#0,yes,a"),
            Err(ControlError::BadPayload("yes".into()))
        );
    }

    #[test]
    fn test_sentinel_never_starts_binary() {
        for kind in 0..=4u8 {
            assert!(!ControlMessage::is_control(&[kind, 0, 0]));
        }
        assert!(ControlMessage::is_control(b"#2,"));
        assert!(!ControlMessage::is_control(&[]));
    }
}
