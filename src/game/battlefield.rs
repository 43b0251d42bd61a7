//! Battlefield
//!
//! Per-star combat state: one home fleet (the owner's garrison) and at most
//! one attacking fleet per other player.
//!
//! Each combat tick every attacker fires on the home fleet, then the
//! surviving home fleet fires back at exactly one attacker, the first in id
//! order. A siege by several players therefore breaks a garrison faster
//! than the garrison can answer.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::core::codec::{WireError, WireRead};
use crate::game::fleet::{CombatRules, Fleet, ShipType, FLEET_WIRE_LEN};
use crate::game::player::PlayerId;

/// What a call to [`BattleField::update`] changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BattleOutcome {
    /// Nothing visible changed.
    Unchanged,
    /// Ship counts changed.
    QuantityChanged,
    /// The star changed hands.
    OwnershipChanged,
}

impl BattleOutcome {
    /// Dirty severity: 0, 1 or 2.
    pub fn severity(self) -> u8 {
        match self {
            BattleOutcome::Unchanged => 0,
            BattleOutcome::QuantityChanged => 1,
            BattleOutcome::OwnershipChanged => 2,
        }
    }
}

/// Combat state of one star.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BattleField {
    home: Fleet,
    attackers: BTreeMap<PlayerId, Fleet>,
    /// Seconds accumulated towards the next combat tick.
    time: f32,
    /// Combat ticks since the last produced ship.
    ticks_since_build: u32,
}

impl BattleField {
    /// Battlefield held by `home`'s owner.
    pub fn new(home: Fleet) -> Self {
        Self {
            home,
            attackers: BTreeMap::new(),
            time: 0.0,
            ticks_since_build: 0,
        }
    }

    /// Current controller of the star.
    pub fn owner(&self) -> PlayerId {
        self.home.owner
    }

    /// The garrison.
    pub fn home(&self) -> &Fleet {
        &self.home
    }

    /// Replace the garrison wholesale (spawns, conquest).
    pub fn set_home(&mut self, fleet: Fleet) {
        self.attackers.remove(&fleet.owner);
        self.home = fleet;
    }

    /// Attacking fleets in retaliation order.
    pub fn attackers(&self) -> impl Iterator<Item = &Fleet> {
        self.attackers.values()
    }

    /// Number of attacking fleets.
    pub fn attacker_count(&self) -> usize {
        self.attackers.len()
    }

    /// Fleet at this star owned by `owner`, home or attacking.
    pub fn fleet_of(&self, owner: PlayerId) -> Option<&Fleet> {
        if self.home.owner == owner {
            Some(&self.home)
        } else {
            self.attackers.get(&owner)
        }
    }

    /// Mutable variant of [`BattleField::fleet_of`].
    pub fn fleet_of_mut(&mut self, owner: PlayerId) -> Option<&mut Fleet> {
        if self.home.owner == owner {
            Some(&mut self.home)
        } else {
            self.attackers.get_mut(&owner)
        }
    }

    /// Drop an attacker whose fleet has emptied (after a dispatch, say).
    pub fn prune_attacker(&mut self, owner: PlayerId) {
        if self.attackers.get(&owner).is_some_and(Fleet::is_empty) {
            self.attackers.remove(&owner);
        }
    }

    /// Merge an arriving fleet: into the owner's existing fleet if there is
    /// one here, else as a new attacker.
    pub fn add_fleet(&mut self, fleet: Fleet) {
        if fleet.is_empty() {
            return;
        }
        match self.fleet_of_mut(fleet.owner) {
            Some(existing) => existing.add(&fleet),
            None => {
                self.attackers.insert(fleet.owner, fleet);
            }
        }
    }

    /// Advance by `dt` seconds.
    ///
    /// Acts once per `rules.combat_interval`, carrying the remainder. Damage
    /// is computed over the full interval regardless of `dt`.
    pub fn update(
        &mut self,
        dt: f32,
        star_width: f32,
        build_type: ShipType,
        rules: &CombatRules,
        neutral: PlayerId,
    ) -> BattleOutcome {
        self.time += dt;
        if self.time < rules.combat_interval {
            return BattleOutcome::Unchanged;
        }
        self.time -= rules.combat_interval;

        if self.attackers.is_empty() {
            return self.produce(star_width, build_type, rules, neutral);
        }

        self.fight(rules, neutral)
    }

    fn produce(
        &mut self,
        star_width: f32,
        build_type: ShipType,
        rules: &CombatRules,
        neutral: PlayerId,
    ) -> BattleOutcome {
        if self.home.owner == neutral {
            return BattleOutcome::Unchanged;
        }
        self.ticks_since_build += 1;
        if self.ticks_since_build < rules.build_period(star_width) {
            return BattleOutcome::Unchanged;
        }
        self.ticks_since_build = 0;
        if self.home.total() >= rules.max_units_for_build {
            return BattleOutcome::Unchanged;
        }
        self.home.add_ships(build_type, 1);
        BattleOutcome::QuantityChanged
    }

    fn fight(&mut self, rules: &CombatRules, neutral: PlayerId) -> BattleOutcome {
        let dt = rules.combat_interval;

        for attacker in self.attackers.values() {
            self.home.absorb_damage(dt, attacker, rules);
        }

        let Some(mut first) = self.attackers.first_entry() else {
            return BattleOutcome::Unchanged;
        };
        first.get_mut().absorb_damage(dt, &self.home, rules);
        let first_owner = *first.key();
        let first_empty = first.get().is_empty();
        if first_empty {
            first.remove();
        }

        if !self.home.is_empty() {
            return BattleOutcome::QuantityChanged;
        }

        let previous = self.home.owner;
        self.home = match self.attackers.remove(&first_owner) {
            Some(conqueror) => conqueror,
            None => Fleet::empty(neutral),
        };
        self.ticks_since_build = 0;

        if self.home.owner == previous {
            BattleOutcome::QuantityChanged
        } else {
            BattleOutcome::OwnershipChanged
        }
    }

    /// Record: `[attackerCount u8][home][attackers...]`.
    pub fn encode<B: BufMut>(&self, buf: &mut B, rules: &CombatRules) {
        buf.put_u8(self.attackers.len().min(u8::MAX as usize) as u8);
        self.home.encode(buf, rules);
        for fleet in self.attackers.values().take(u8::MAX as usize) {
            fleet.encode(buf, rules);
        }
    }

    /// Encoded length.
    pub fn encoded_len(&self) -> usize {
        1 + FLEET_WIRE_LEN * (1 + self.attackers.len().min(u8::MAX as usize))
    }

    /// Overwrite fleets from a record, keeping local timers.
    pub fn apply<B: Buf>(&mut self, buf: &mut B, rules: &CombatRules) -> Result<(), WireError> {
        let decoded = Self::decode(buf, rules)?;
        self.home = decoded.home;
        self.attackers = decoded.attackers;
        Ok(())
    }

    /// Decode a record into a fresh battlefield.
    pub fn decode<B: Buf>(buf: &mut B, rules: &CombatRules) -> Result<Self, WireError> {
        let count = buf.read_u8("attacker count")?;
        let home = Fleet::decode(buf, rules)?;
        let mut field = Self::new(home);
        for _ in 0..count {
            let fleet = Fleet::decode(buf, rules)?;
            field.attackers.insert(fleet.owner, fleet);
        }
        Ok(field)
    }
}

// =============================================================================
// TESTS
// =============================================================================
