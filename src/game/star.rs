//! Stars
//!
//! A star is a fixed position in the galaxy with a build order and a
//! battlefield. Stars are created at generation time on the host, or the
//! first time a client sees an unknown id in a delta, and live for the
//! whole session.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::core::codec::{WireError, WireRead};
use crate::core::{Rect, Vec2};
use crate::game::battlefield::{BattleField, BattleOutcome};
use crate::game::fleet::{CombatRules, Fleet, ShipType};
use crate::game::player::PlayerId;

/// Stable star identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StarId(pub i32);

impl fmt::Display for StarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "star {}", self.0)
    }
}

/// A star system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Star {
    /// Identity.
    pub id: StarId,
    /// World-space bounds.
    pub bounds: Rect,
    /// Ship type produced here.
    pub build_type: ShipType,
    /// Combat state.
    pub battlefield: BattleField,
}

impl Star {
    /// New star of side `size` centred at `center`, garrisoned by `home`.
    pub fn new(id: StarId, center: Vec2, size: f32, home: Fleet) -> Self {
        Self {
            id,
            bounds: Rect::from_center(center, size),
            build_type: ShipType::default(),
            battlefield: BattleField::new(home),
        }
    }

    /// Centre of the bounds.
    pub fn center(&self) -> Vec2 {
        self.bounds.center()
    }

    /// Current controller.
    pub fn owner(&self) -> PlayerId {
        self.battlefield.owner()
    }

    /// Advance combat and production.
    pub fn update(&mut self, dt: f32, rules: &CombatRules, neutral: PlayerId) -> BattleOutcome {
        let width = self.bounds.width();
        self.battlefield.update(dt, width, self.build_type, rules, neutral)
    }

    /// Delta record:
    /// `[id i32][left f32][top f32][right f32][bottom f32][buildType i8][battlefield]`.
    pub fn encode<B: BufMut>(&self, buf: &mut B, rules: &CombatRules) {
        buf.put_i32(self.id.0);
        buf.put_f32(self.bounds.left);
        buf.put_f32(self.bounds.top);
        buf.put_f32(self.bounds.right);
        buf.put_f32(self.bounds.bottom);
        buf.put_i8(self.build_type as i8);
        self.battlefield.encode(buf, rules);
    }

    /// Encoded length.
    pub fn encoded_len(&self) -> usize {
        4 + 4 * 4 + 1 + self.battlefield.encoded_len()
    }

    /// Read the id at the front of a record without consuming it.
    pub fn peek_id(buf: &[u8]) -> Result<StarId, WireError> {
        let mut head = buf;
        Ok(StarId(head.read_i32("star id")?))
    }

    /// Decode a full record.
    pub fn decode<B: Buf>(buf: &mut B, rules: &CombatRules) -> Result<Self, WireError> {
        let id = StarId(buf.read_i32("star id")?);
        let bounds = read_bounds(buf)?;
        let build_type = ShipType::try_from(buf.read_i8("build type")?)?;
        let battlefield = BattleField::decode(buf, rules)?;
        Ok(Self { id, bounds, build_type, battlefield })
    }

    /// Update in place from a record with this star's id.
    ///
    /// Bounds are kept: stars never move once placed. Local combat timers
    /// survive so a mirror keeps its own cadence.
    pub fn apply<B: Buf>(&mut self, buf: &mut B, rules: &CombatRules) -> Result<(), WireError> {
        let id = StarId(buf.read_i32("star id")?);
        if id != self.id {
            return Err(WireError::Invalid { what: "star id", value: id.0 as i64 });
        }
        read_bounds(buf)?;
        self.build_type = ShipType::try_from(buf.read_i8("build type")?)?;
        self.battlefield.apply(buf, rules)
    }
}

fn read_bounds<B: Buf>(buf: &mut B) -> Result<Rect, WireError> {
    let left = buf.read_f32("star left")?;
    let top = buf.read_f32("star top")?;
    let right = buf.read_f32("star right")?;
    let bottom = buf.read_f32("star bottom")?;
    if !(left.is_finite() && top.is_finite() && right.is_finite() && bottom.is_finite())
        || left > right
        || top > bottom
    {
        return Err(WireError::Invalid { what: "star bounds", value: 0 });
    }
    Ok(Rect::new(left, top, right, bottom))
}
