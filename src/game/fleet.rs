//! Fleets and Damage Resolution
//!
//! Ship counts are continuous so damage can leave a ship half destroyed.
//! The displayed (and fighting) count of a type is the ceiling of its
//! continuous value.
//!
//! Three ship types form a dominance cycle: A beats B, B beats C, C beats A.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::core::codec::{WireError, WireRead};
use crate::game::player::PlayerId;

/// Encoded size of a fleet record in bytes.
pub const FLEET_WIRE_LEN: usize = 4 + 4 + 2 * 3;

/// Most wound (in ships) a single type can carry after decoding without
/// losing a displayed ship.
const MAX_WOUND_PER_TYPE: f32 = 0.99;

// =============================================================================
// SHIP TYPES
// =============================================================================

/// Ship type in the dominance triangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShipType {
    /// Beats B
    #[default]
    A = 0,
    /// Beats C
    B = 1,
    /// Beats A
    C = 2,
}

impl ShipType {
    /// All types in wire order.
    pub const ALL: [ShipType; 3] = [ShipType::A, ShipType::B, ShipType::C];

    /// The type this one deals advantage damage to.
    pub const fn beats(self) -> ShipType {
        match self {
            ShipType::A => ShipType::B,
            ShipType::B => ShipType::C,
            ShipType::C => ShipType::A,
        }
    }

    /// The type that deals advantage damage to this one.
    pub const fn beaten_by(self) -> ShipType {
        match self {
            ShipType::A => ShipType::C,
            ShipType::B => ShipType::A,
            ShipType::C => ShipType::B,
        }
    }

    /// Damage multiplier when `self` attacks `target`.
    pub fn multiplier_against(self, target: ShipType, rules: &CombatRules) -> f32 {
        if self.beats() == target {
            rules.advantage_multiplier
        } else if self.beaten_by() == target {
            rules.weakness_multiplier
        } else {
            1.0
        }
    }

    /// Array index.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<i8> for ShipType {
    type Error = WireError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ShipType::A),
            1 => Ok(ShipType::B),
            2 => Ok(ShipType::C),
            other => Err(WireError::Invalid { what: "ship type", value: other as i64 }),
        }
    }
}

// =============================================================================
// COMBAT RULES
// =============================================================================

/// Combat and production constants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombatRules {
    /// Hit points of a single ship.
    pub ship_hp: f32,
    /// Multiplier against the type a ship beats.
    pub advantage_multiplier: f32,
    /// Multiplier against the type that beats a ship.
    pub weakness_multiplier: f32,
    /// Damage per ship per second.
    pub base_damage: f32,
    /// Seconds between combat ticks.
    pub combat_interval: f32,
    /// Production period in combat ticks is `build_interval_factor / star width`.
    pub build_interval_factor: f32,
    /// Home fleet size at which production halts.
    pub max_units_for_build: u32,
}

impl Default for CombatRules {
    fn default() -> Self {
        Self {
            ship_hp: 5.0,
            advantage_multiplier: 1.5,
            weakness_multiplier: 0.6667,
            base_damage: 2.5,
            combat_interval: 1.0,
            build_interval_factor: 0.8,
            max_units_for_build: 50,
        }
    }
}

impl CombatRules {
    /// Combat ticks between two produced ships at a star of `star_width`.
    pub fn build_period(&self, star_width: f32) -> u32 {
        if star_width <= 0.0 {
            return u32::MAX;
        }
        ((self.build_interval_factor / star_width) as u32).max(1)
    }
}

// =============================================================================
// FLEET
// =============================================================================

/// A group of ships owned by one player.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    /// Owner identity.
    pub owner: PlayerId,
    /// Continuous ship count per type, indexed by [`ShipType::index`].
    ships: [f32; 3],
}

impl Fleet {
    /// Fleet with whole-ship counts for A, B and C.
    pub fn new(owner: PlayerId, a: u16, b: u16, c: u16) -> Self {
        Self { owner, ships: [a as f32, b as f32, c as f32] }
    }

    /// Empty fleet.
    pub fn empty(owner: PlayerId) -> Self {
        Self { owner, ships: [0.0; 3] }
    }

    /// Fleet built from continuous counts. Negative values are clamped.
    pub fn from_counts(owner: PlayerId, ships: [f32; 3]) -> Self {
        Self { owner, ships: ships.map(|n| n.max(0.0)) }
    }

    /// Continuous count of a type.
    #[inline]
    pub fn raw(&self, t: ShipType) -> f32 {
        self.ships[t.index()]
    }

    /// Displayed (whole) count of a type.
    #[inline]
    pub fn count(&self, t: ShipType) -> u16 {
        self.ships[t.index()].ceil().min(u16::MAX as f32) as u16
    }

    /// Displayed counts for A, B, C.
    pub fn counts(&self) -> [u16; 3] {
        ShipType::ALL.map(|t| self.count(t))
    }

    /// Total displayed ships.
    pub fn total(&self) -> u32 {
        self.counts().iter().map(|&n| n as u32).sum()
    }

    /// No ship of any type remains.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Merge another fleet's ships into this one.
    pub fn add(&mut self, other: &Fleet) {
        for (mine, theirs) in self.ships.iter_mut().zip(other.ships) {
            *mine += theirs;
        }
    }

    /// Add whole ships of one type.
    pub fn add_ships(&mut self, t: ShipType, n: u16) {
        self.ships[t.index()] += n as f32;
    }

    /// Remove up to `request` ships of each type and return what was
    /// actually removed, owned by the requester. A wounded type yields only
    /// its continuous count, so ships are never created.
    pub fn take(&mut self, request: &Fleet) -> Fleet {
        let mut taken = Fleet::empty(request.owner);
        for ((mine, out), wanted) in self.ships.iter_mut().zip(taken.ships.iter_mut()).zip(request.ships) {
            let n = wanted.min(*mine).max(0.0);
            *mine -= n;
            *out = n;
        }
        taken
    }

    /// Every displayed count is at most the matching count in `other`.
    ///
    /// Whole ships only; partial damage is ignored.
    pub fn is_subset_of(&self, other: &Fleet) -> bool {
        ShipType::ALL.iter().all(|&t| self.count(t) <= other.count(t))
    }

    /// Take one combat tick of fire from `enemy` lasting `dt` seconds.
    ///
    /// Each enemy type spends its output first on the type it beats, then
    /// on its own type, and whatever is left on the type that beats it.
    /// Every type finishes a stage before any type starts the next.
    pub fn absorb_damage(&mut self, dt: f32, enemy: &Fleet, rules: &CombatRules) {
        let mut output = ShipType::ALL
            .map(|t| enemy.count(t) as f32 * rules.base_damage * dt);

        for t in ShipType::ALL {
            let target = t.beats();
            output[t.index()] = self.damage_pool(target, output[t.index()], rules.advantage_multiplier, rules);
        }
        for t in ShipType::ALL {
            output[t.index()] = self.damage_pool(t, output[t.index()], 1.0, rules);
        }
        for t in ShipType::ALL {
            let target = t.beaten_by();
            self.damage_pool(target, output[t.index()], rules.weakness_multiplier, rules);
        }
    }

    /// Apply `dmg` at `multiplier` to one pool and return the unspent damage
    /// in unmultiplied units.
    fn damage_pool(&mut self, t: ShipType, dmg: f32, multiplier: f32, rules: &CombatRules) -> f32 {
        if dmg <= 0.0 {
            return 0.0;
        }
        let pool = &mut self.ships[t.index()];
        let hp = *pool * rules.ship_hp - dmg * multiplier;
        *pool = (hp / rules.ship_hp).max(0.0);
        (-hp).max(0.0) / multiplier
    }

    /// Damage carried by ships that are hit but not yet destroyed, in HP.
    pub fn wound(&self, rules: &CombatRules) -> f32 {
        self.ships
            .iter()
            .map(|&n| (n.ceil() - n) * rules.ship_hp)
            .sum()
    }

    /// Compact record: `[owner i32][wound f32][A i16][B i16][C i16]`.
    pub fn encode<B: BufMut>(&self, buf: &mut B, rules: &CombatRules) {
        buf.put_i32(self.owner.0);
        buf.put_f32(self.wound(rules));
        for n in self.counts() {
            buf.put_i16(n.min(i16::MAX as u16) as i16);
        }
    }

    /// Decode a compact record.
    ///
    /// The wound is spread over the types in A, B, C order, at most just
    /// under one ship per type, so displayed counts survive the trip.
    pub fn decode<B: Buf>(buf: &mut B, rules: &CombatRules) -> Result<Self, WireError> {
        let owner = PlayerId(buf.read_i32("fleet owner")?);
        let wound = buf.read_f32("fleet wound")?;
        if !wound.is_finite() || wound < 0.0 {
            return Err(WireError::Invalid { what: "fleet wound", value: wound as i64 });
        }

        let mut ships = [0.0f32; 3];
        for slot in ships.iter_mut() {
            let n = buf.read_i16("ship count")?;
            if n < 0 {
                return Err(WireError::Invalid { what: "ship count", value: n as i64 });
            }
            *slot = n as f32;
        }

        let mut remaining = wound / rules.ship_hp;
        for n in ships.iter_mut().filter(|n| **n > 0.0) {
            let take = remaining.min(MAX_WOUND_PER_TYPE);
            *n -= take;
            remaining -= take;
        }

        Ok(Self { owner, ships })
    }
}

impl fmt::Debug for Fleet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.ships;
        write!(f, "Fleet({} A={:.2} B={:.2} C={:.2})", self.owner, a, b, c)
    }
}

// =============================================================================
// TESTS
// =============================================================================
