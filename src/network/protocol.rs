//! Protocol Messages
//!
//! Every datagram is one event:
//!
//! ```text
//! [header u8][originSlot u8][payload ...]
//! ```
//!
//! There is no length prefix; the payload runs to the end of the datagram.
//! [`GameEvent`] is the raw framing and knows nothing about payloads.
//! [`Message`] is the closed set of typed messages layered on top. A header
//! byte outside the table is a [`ProtocolError::UnknownHeader`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

use crate::core::codec::{WireError, WireRead};
use crate::game::fleet::{CombatRules, Fleet, ShipType};
use crate::game::player::Player;
use crate::game::star::StarId;
use crate::game::world::{BuildOrder, DispatchOrder};

/// Origin slot used when the host speaks for itself or the sender has no seat.
pub const ORIGIN_NONE: u8 = u8::MAX;

/// Largest datagram either side will read.
pub const MAX_DATAGRAM: usize = 64 * 1024;

// =============================================================================
// HEADERS
// =============================================================================

/// Message kind discriminant, the first byte of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Header {
    /// Host announcing itself (discovery; reserved).
    BroadcastAddress = 0,
    /// Peer asking to join.
    RequestConnection = 1,
    /// A peer left; origin slot names who.
    Disconnected = 2,
    /// Host will not admit new peers.
    ConnectionRefused = 3,
    /// Host is at capacity.
    ConnectionRefusedFull = 4,
    /// Peer is ready to start.
    RequestGameStart = 5,
    /// Peer wants the whole map resent.
    RequestMap = 6,
    /// Game is starting.
    GameStart = 7,
    /// Host asks for a profile; payload carries the assigned slot.
    RequestPlayerProfile = 8,
    /// A player profile.
    SubmittedPlayerProfile = 9,
    /// Ships sent between stars.
    FleetDispatched = 10,
    /// Production change at a star.
    NewBuildOrder = 11,
    /// Star delta from the host.
    StarStateChanged = 12,
    /// Liveness probe.
    Ping = 13,
    /// Liveness answer.
    Pong = 14,
}

impl Header {
    /// Every header in discriminant order.
    pub const ALL: [Header; 15] = [
        Header::BroadcastAddress,
        Header::RequestConnection,
        Header::Disconnected,
        Header::ConnectionRefused,
        Header::ConnectionRefusedFull,
        Header::RequestGameStart,
        Header::RequestMap,
        Header::GameStart,
        Header::RequestPlayerProfile,
        Header::SubmittedPlayerProfile,
        Header::FleetDispatched,
        Header::NewBuildOrder,
        Header::StarStateChanged,
        Header::Ping,
        Header::Pong,
    ];
}

impl TryFrom<u8> for Header {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Header::ALL
            .get(value as usize)
            .copied()
            .ok_or(ProtocolError::UnknownHeader(value))
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Protocol violations. Fatal to the connection that produced them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header byte outside the table.
    #[error("unknown header byte {0}")]
    UnknownHeader(u8),

    /// Datagram shorter than the two framing bytes.
    #[error("datagram of {0} bytes is too short")]
    Truncated(usize),

    /// Payload did not decode.
    #[error("bad {header:?} payload: {source}")]
    Payload {
        /// Message kind
        header: Header,
        /// Decode failure
        source: WireError,
    },

    /// Bytes left over after a complete payload.
    #[error("{extra} trailing bytes after {header:?} payload")]
    TrailingBytes {
        /// Message kind
        header: Header,
        /// Unread byte count
        extra: usize,
    },
}

// =============================================================================
// FRAMING
// =============================================================================

/// One framed datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEvent {
    /// Message kind.
    pub header: Header,
    /// Slot of the player the event is about or from.
    pub origin: u8,
    /// Opaque payload.
    pub payload: Bytes,
}

impl GameEvent {
    /// Event with a payload.
    pub fn new(header: Header, origin: u8, payload: Bytes) -> Self {
        Self { header, origin, payload }
    }

    /// Event without a payload.
    pub fn bare(header: Header, origin: u8) -> Self {
        Self::new(header, origin, Bytes::new())
    }

    /// Split a datagram into header, origin and payload.
    pub fn decode(mut datagram: Bytes) -> Result<Self, ProtocolError> {
        if datagram.len() < 2 {
            return Err(ProtocolError::Truncated(datagram.len()));
        }
        let header = Header::try_from(datagram.get_u8())?;
        let origin = datagram.get_u8();
        Ok(Self { header, origin, payload: datagram })
    }

    /// Datagram bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.payload.len());
        buf.put_u8(self.header as u8);
        buf.put_u8(self.origin);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

// =============================================================================
// TYPED MESSAGES
// =============================================================================

/// Typed view of a [`GameEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Discovery announcement.
    BroadcastAddress,
    /// Join request.
    RequestConnection,
    /// Leave notice.
    Disconnected,
    /// Admission refused.
    ConnectionRefused,
    /// Admission refused, host full.
    ConnectionRefusedFull,
    /// Ready flag.
    RequestGameStart,
    /// Full map resend request.
    RequestMap,
    /// Start signal.
    GameStart,
    /// Profile request carrying the seat the host assigned.
    RequestPlayerProfile(Player),
    /// A profile.
    SubmittedPlayerProfile(Player),
    /// Ships sent between stars, with an optional per-sender sequence
    /// number for duplicate suppression.
    FleetDispatched {
        /// The order
        order: DispatchOrder,
        /// Sender sequence number
        seq: Option<u32>,
    },
    /// Production change.
    NewBuildOrder(BuildOrder),
    /// Star delta, applied by the star map.
    StarStateChanged(Bytes),
    /// Liveness probe.
    Ping,
    /// Liveness answer.
    Pong,
}

impl Message {
    /// Header for this message.
    pub fn header(&self) -> Header {
        match self {
            Message::BroadcastAddress => Header::BroadcastAddress,
            Message::RequestConnection => Header::RequestConnection,
            Message::Disconnected => Header::Disconnected,
            Message::ConnectionRefused => Header::ConnectionRefused,
            Message::ConnectionRefusedFull => Header::ConnectionRefusedFull,
            Message::RequestGameStart => Header::RequestGameStart,
            Message::RequestMap => Header::RequestMap,
            Message::GameStart => Header::GameStart,
            Message::RequestPlayerProfile(_) => Header::RequestPlayerProfile,
            Message::SubmittedPlayerProfile(_) => Header::SubmittedPlayerProfile,
            Message::FleetDispatched { .. } => Header::FleetDispatched,
            Message::NewBuildOrder(_) => Header::NewBuildOrder,
            Message::StarStateChanged(_) => Header::StarStateChanged,
            Message::Ping => Header::Ping,
            Message::Pong => Header::Pong,
        }
    }

    /// Frame as an event from `origin`.
    pub fn to_event(&self, origin: u8, rules: &CombatRules) -> GameEvent {
        GameEvent::new(self.header(), origin, self.encode_payload(rules))
    }

    /// Payload bytes.
    pub fn encode_payload(&self, rules: &CombatRules) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::RequestPlayerProfile(p) | Message::SubmittedPlayerProfile(p) => {
                p.encode(&mut buf);
            }
            Message::FleetDispatched { order, seq } => {
                buf.put_i32(order.source.0);
                order.fleet.encode(&mut buf, rules);
                buf.put_i32(order.dest.0);
                if let Some(seq) = seq {
                    buf.put_u32(*seq);
                }
            }
            Message::NewBuildOrder(order) => {
                buf.put_i32(order.star.0);
                buf.put_i8(order.build_type as i8);
            }
            Message::StarStateChanged(delta) => return delta.clone(),
            Message::BroadcastAddress
            | Message::RequestConnection
            | Message::Disconnected
            | Message::ConnectionRefused
            | Message::ConnectionRefusedFull
            | Message::RequestGameStart
            | Message::RequestMap
            | Message::GameStart
            | Message::Ping
            | Message::Pong => {}
        }
        buf.freeze()
    }

    /// Decode the payload of `event`.
    ///
    /// Payload-less kinds ignore any bytes they carry. Structured kinds
    /// reject both short and over-long payloads.
    pub fn decode(event: &GameEvent, rules: &CombatRules) -> Result<Self, ProtocolError> {
        let header = event.header;
        let mut buf = event.payload.clone();
        let wire = |source| ProtocolError::Payload { header, source };

        let msg = match header {
            Header::BroadcastAddress => return Ok(Message::BroadcastAddress),
            Header::RequestConnection => return Ok(Message::RequestConnection),
            Header::Disconnected => return Ok(Message::Disconnected),
            Header::ConnectionRefused => return Ok(Message::ConnectionRefused),
            Header::ConnectionRefusedFull => return Ok(Message::ConnectionRefusedFull),
            Header::RequestGameStart => return Ok(Message::RequestGameStart),
            Header::RequestMap => return Ok(Message::RequestMap),
            Header::GameStart => return Ok(Message::GameStart),
            Header::Ping => return Ok(Message::Ping),
            Header::Pong => return Ok(Message::Pong),
            Header::StarStateChanged => return Ok(Message::StarStateChanged(buf)),

            Header::RequestPlayerProfile => {
                Message::RequestPlayerProfile(Player::decode(&mut buf).map_err(wire)?)
            }
            Header::SubmittedPlayerProfile => {
                Message::SubmittedPlayerProfile(Player::decode(&mut buf).map_err(wire)?)
            }
            Header::FleetDispatched => {
                let source = StarId(buf.read_i32("source star").map_err(wire)?);
                let fleet = Fleet::decode(&mut buf, rules).map_err(wire)?;
                let dest = StarId(buf.read_i32("destination star").map_err(wire)?);
                let seq = if buf.has_remaining() {
                    Some(buf.read_u32("dispatch sequence").map_err(wire)?)
                } else {
                    None
                };
                Message::FleetDispatched { order: DispatchOrder { source, fleet, dest }, seq }
            }
            Header::NewBuildOrder => {
                let star = StarId(buf.read_i32("star id").map_err(wire)?);
                let build_type = ShipType::try_from(buf.read_i8("build type").map_err(wire)?)
                    .map_err(wire)?;
                Message::NewBuildOrder(BuildOrder { star, build_type })
            }
        };

        if buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes { header, extra: buf.remaining() });
        }
        Ok(msg)
    }
}

// =============================================================================
// TESTS
// =============================================================================
