//! Player Identity
//!
//! A player is a session-random 32-bit identity plus a seat (slot) at the
//! table. Equality and hashing use the identity only, so a resubmitted
//! profile with a new name or slot still compares equal to the old one.
//!
//! There is no global identity table: a [`Roster`] is constructed per
//! session and passed to whatever needs to resolve ids to players.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::codec::{put_name, WireError, WireRead};

/// Identity reserved for the neutral owner of uncontested stars.
pub const DEFAULT_NEUTRAL_ID: PlayerId = PlayerId(1_234_567);

/// Slot held by the neutral player. Real players start at 1.
pub const NEUTRAL_SLOT: u8 = 0;

/// Unique player identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PlayerId(pub i32);

impl PlayerId {
    /// Draw a random identity that differs from `reserved`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, reserved: PlayerId) -> Self {
        loop {
            let id = PlayerId(rng.gen());
            if id != reserved {
                return id;
            }
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A seat at the table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    /// Unique identity
    pub id: PlayerId,
    /// Seat number (0 = neutral, 1.. = players)
    pub slot: u8,
    /// Display name
    pub name: String,
    /// Player has asked for the game to start
    pub start_requested: bool,
}

impl Player {
    /// Create a player.
    pub fn new(id: PlayerId, slot: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            slot,
            name: name.into(),
            start_requested: false,
        }
    }

    /// The neutral sentinel for a session.
    pub fn neutral(id: PlayerId) -> Self {
        Self::new(id, NEUTRAL_SLOT, "Neutral")
    }

    /// Whether this is the neutral sentinel.
    pub fn is_neutral(&self) -> bool {
        self.slot == NEUTRAL_SLOT
    }

    /// Profile record: `[id i32][slot i8][nameLen i8][name]`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.id.0);
        buf.put_i8(self.slot as i8);
        put_name(buf, &self.name);
    }

    /// Decode a profile record.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        let id = PlayerId(buf.read_i32("player id")?);
        let slot = buf.read_i8("player slot")?;
        if slot < 0 {
            return Err(WireError::Invalid { what: "player slot", value: slot as i64 });
        }
        let name = buf.read_name()?;
        Ok(Self::new(id, slot as u8, name))
    }

    /// Encoded profile length.
    pub fn encoded_len(&self) -> usize {
        4 + 1 + 1 + crate::core::codec::truncate_name(&self.name).len()
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Player {}

impl Hash for Player {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (slot {}, {})", self.name, self.slot, self.id)
    }
}

// =============================================================================
// ROSTER
// =============================================================================

/// Identity context for one session: every known player plus the neutral
/// sentinel.
#[derive(Clone, Debug)]
pub struct Roster {
    neutral: Player,
    players: BTreeMap<PlayerId, Player>,
}

impl Roster {
    /// Empty roster around a neutral identity.
    pub fn new(neutral_id: PlayerId) -> Self {
        Self {
            neutral: Player::neutral(neutral_id),
            players: BTreeMap::new(),
        }
    }

    /// Resolve an identity, including the neutral sentinel.
    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        if id == self.neutral.id {
            return Some(&self.neutral);
        }
        self.players.get(&id)
    }

    /// Player seated at `slot`.
    pub fn by_slot(&self, slot: u8) -> Option<&Player> {
        self.players.values().find(|p| p.slot == slot)
    }

    /// Insert or replace a player. Returns the previous record.
    pub fn upsert(&mut self, player: Player) -> Option<Player> {
        self.players.insert(player.id, player)
    }

    /// Remove whoever sits at `slot`.
    pub fn remove_slot(&mut self, slot: u8) -> Option<Player> {
        let id = self.by_slot(slot)?.id;
        self.players.remove(&id)
    }

    /// Non-neutral players in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Number of non-neutral players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no players are seated.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
