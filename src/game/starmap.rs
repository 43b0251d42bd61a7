//! Star Map and Delta Sync
//!
//! Owns every star, a spatial index over their centres, and the dirty set
//! that drives synchronization.
//!
//! ## Sync
//!
//! The host marks stars dirty with a severity (1 = counts changed,
//! 2 = ownership or structure changed). [`StarMap::flush`] drains the set
//! into one payload:
//!
//! ```text
//! [dirtyCount i16][severity i8] { star record } * dirtyCount
//! ```
//!
//! Receivers apply records for known ids in place and create stars for
//! unknown ids. Records carry full current values, so lost or reordered
//! payloads heal on the next flush touching the same star.

use std::collections::{BTreeMap, BTreeSet};

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::codec::{WireError, WireRead};
use crate::core::hash::{StateHash, StateHasher};
use crate::core::{QuadTree, Rect, Vec2};
use crate::game::battlefield::BattleOutcome;
use crate::game::fleet::{CombatRules, Fleet, ShipType};
use crate::game::player::PlayerId;
use crate::game::star::{Star, StarId};

/// Initial half extent of the indexed region around the origin. The index
/// doubles whenever a star lands outside it.
pub const INDEX_HALF_EXTENT: f32 = 5.0;

/// Largest star delta one flush produces. Keeps the framed datagram below
/// the 65,507-byte UDP payload limit.
pub const MAX_FLUSH_BYTES: usize = 60 * 1024;

/// Search radius for "star under this point".
pub const SELECT_RADIUS: f32 = 0.3;

/// Severity for count-only changes.
pub const SEVERITY_MINOR: u8 = 1;

/// Severity for ownership or structural changes.
pub const SEVERITY_MAJOR: u8 = 2;

/// Star map errors.
#[derive(Debug, Error)]
pub enum MapError {
    /// Payload could not be decoded.
    #[error("malformed delta: {0}")]
    Wire(#[from] WireError),

    /// Star centre is not a finite point.
    #[error("{0} lies outside the map")]
    OutOfBounds(StarId),

    /// A star with this id already exists.
    #[error("{0} already exists")]
    Duplicate(StarId),
}

/// Summary of an applied delta.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeltaApplied {
    /// Known stars updated in place.
    pub updated: usize,
    /// Previously unknown stars created.
    pub inserted: usize,
    /// Severity tag of the payload.
    pub severity: u8,
}

impl DeltaApplied {
    /// Ownership outlines need recomputing.
    pub fn needs_territory_refresh(&self) -> bool {
        self.severity >= SEVERITY_MAJOR
    }
}

/// All stars of a session.
#[derive(Debug, Clone)]
pub struct StarMap {
    stars: BTreeMap<StarId, Star>,
    index: QuadTree<StarId>,
    dirty: BTreeSet<StarId>,
    severity: u8,
    central: Option<StarId>,
    rules: CombatRules,
}

impl StarMap {
    /// Empty map.
    pub fn new(rules: CombatRules) -> Self {
        let extent = INDEX_HALF_EXTENT;
        Self {
            stars: BTreeMap::new(),
            index: QuadTree::new(Rect::new(-extent, -extent, extent, extent)),
            dirty: BTreeSet::new(),
            severity: 0,
            central: None,
            rules,
        }
    }

    /// Combat constants used for records and updates.
    pub fn rules(&self) -> &CombatRules {
        &self.rules
    }

    /// Add a star to the map and the index.
    pub fn insert(&mut self, star: Star) -> Result<(), MapError> {
        let id = star.id;
        if self.stars.contains_key(&id) {
            return Err(MapError::Duplicate(id));
        }
        let center = star.center();
        if !center.x.is_finite() || !center.y.is_finite() {
            return Err(MapError::OutOfBounds(id));
        }
        if !self.index.bounds().contains(center) {
            self.grow_index(center);
        }
        if !self.index.insert(center, id) {
            return Err(MapError::OutOfBounds(id));
        }
        self.stars.insert(id, star);
        Ok(())
    }

    /// Rebuild the index, doubling its extent until `point` fits.
    fn grow_index(&mut self, point: Vec2) {
        let mut extent = self.index.bounds().right.max(INDEX_HALF_EXTENT);
        let needed = point.x.abs().max(point.y.abs());
        while extent < needed {
            extent *= 2.0;
        }
        let mut index = QuadTree::new(Rect::new(-extent, -extent, extent, extent));
        for (id, star) in &self.stars {
            index.insert(star.center(), *id);
        }
        debug!(extent, stars = self.stars.len(), "Star index grown");
        self.index = index;
    }

    /// Mark `id` as the immovable centre star, never used as a spawn.
    pub fn set_central(&mut self, id: StarId) {
        self.central = Some(id);
    }

    /// The centre star, if any.
    pub fn central(&self) -> Option<StarId> {
        self.central
    }

    /// Star by id.
    pub fn get(&self, id: StarId) -> Option<&Star> {
        self.stars.get(&id)
    }

    /// Mutable star by id. Callers must not move the star.
    pub fn get_mut(&mut self, id: StarId) -> Option<&mut Star> {
        self.stars.get_mut(&id)
    }

    /// Stars in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Star> {
        self.stars.values()
    }

    /// Number of stars.
    pub fn len(&self) -> usize {
        self.stars.len()
    }

    /// Whether the map has no stars.
    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    /// Star closest (Manhattan) to `point` within [`SELECT_RADIUS`].
    pub fn star_at(&self, point: Vec2) -> Option<&Star> {
        let id = self.index.nearest(point, SELECT_RADIUS)?;
        self.stars.get(id)
    }

    /// Stars whose centres fall inside `range`.
    pub fn stars_in(&self, range: &Rect) -> Vec<&Star> {
        self.index
            .query_range(range)
            .into_iter()
            .filter_map(|(_, id)| self.stars.get(id))
            .collect()
    }

    // =========================================================================
    // Dirty tracking
    // =========================================================================

    /// Record a change to `id`. Severity 0 is ignored.
    pub fn mark_dirty(&mut self, id: StarId, severity: u8) {
        if severity == 0 || !self.stars.contains_key(&id) {
            return;
        }
        self.dirty.insert(id);
        self.severity = self.severity.max(severity);
    }

    /// Mark every star dirty at [`SEVERITY_MAJOR`].
    pub fn make_all_dirty(&mut self) {
        debug!(stars = self.stars.len(), "Marking whole map dirty");
        self.dirty.extend(self.stars.keys().copied());
        if !self.stars.is_empty() {
            self.severity = SEVERITY_MAJOR;
        }
    }

    /// Whether anything changed since the last flush.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Highest severity pending.
    pub fn severity(&self) -> u8 {
        self.severity
    }

    /// Number of pending stars.
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Serialize pending stars, at most [`MAX_FLUSH_BYTES`] of them, and
    /// clear them from the dirty set.
    pub fn flush(&mut self) -> Bytes {
        self.flush_within(MAX_FLUSH_BYTES)
    }

    /// Like [`StarMap::flush`] with an explicit payload budget.
    ///
    /// Stars past the budget or past an `i16` count spill into the next
    /// flush. At least one record is always taken.
    pub fn flush_within(&mut self, max_bytes: usize) -> Bytes {
        let mut ids = Vec::new();
        let mut body = 0;
        for id in &self.dirty {
            let Some(star) = self.stars.get(id) else { continue };
            let len = star.encoded_len();
            if ids.len() == i16::MAX as usize || (!ids.is_empty() && 3 + body + len > max_bytes) {
                break;
            }
            body += len;
            ids.push(*id);
        }
        if self.dirty.len() > ids.len() {
            debug!(sent = ids.len(), pending = self.dirty.len() - ids.len(), "Flush spills");
        }

        let mut buf = BytesMut::with_capacity(3 + body);
        buf.put_i16(ids.len() as i16);
        buf.put_i8(self.severity as i8);
        for id in &ids {
            if let Some(star) = self.stars.get(id) {
                star.encode(&mut buf, &self.rules);
            }
            self.dirty.remove(id);
        }

        if self.dirty.is_empty() {
            self.severity = 0;
        }
        buf.freeze()
    }

    /// Apply a payload produced by [`StarMap::flush`].
    ///
    /// Records before a malformed one stay applied.
    pub fn apply_delta(&mut self, payload: &[u8]) -> Result<DeltaApplied, MapError> {
        let mut buf = payload;
        let count = buf.read_i16("dirty count")?;
        if count < 0 {
            return Err(WireError::Invalid { what: "dirty count", value: count as i64 }.into());
        }
        let severity = buf.read_i8("severity")?;
        if !(0..=SEVERITY_MAJOR as i8).contains(&severity) {
            return Err(WireError::Invalid { what: "severity", value: severity as i64 }.into());
        }

        let mut applied = DeltaApplied { severity: severity as u8, ..Default::default() };
        for _ in 0..count {
            let id = Star::peek_id(buf)?;
            match self.stars.get_mut(&id) {
                Some(star) => {
                    star.apply(&mut buf, &self.rules)?;
                    applied.updated += 1;
                }
                None => {
                    let star = Star::decode(&mut buf, &self.rules)?;
                    self.insert(star)?;
                    applied.inserted += 1;
                }
            }
        }
        Ok(applied)
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    /// Advance every star and mark the changed ones dirty.
    ///
    /// Returns the stars whose outcome was not [`BattleOutcome::Unchanged`].
    pub fn update(&mut self, dt: f32, neutral: PlayerId) -> Vec<(StarId, BattleOutcome)> {
        let rules = &self.rules;
        let changed: Vec<(StarId, BattleOutcome)> = self
            .stars
            .values_mut()
            .filter_map(|star| {
                let outcome = star.update(dt, rules, neutral);
                (outcome != BattleOutcome::Unchanged).then_some((star.id, outcome))
            })
            .collect();

        for (id, outcome) in &changed {
            self.mark_dirty(*id, outcome.severity());
        }
        changed
    }

    /// Hand each player a starting star.
    ///
    /// Players (in the given order) are placed at the unclaimed non-central
    /// star nearest to a point on the rim, the point rotating by
    /// `2π / players` between picks. Returns the assignments made.
    pub fn set_spawns(
        &mut self,
        players: &[PlayerId],
        fleet: [u16; 3],
        rim_radius: f32,
    ) -> Vec<(PlayerId, StarId)> {
        if players.is_empty() {
            return Vec::new();
        }
        let step = std::f32::consts::TAU / players.len() as f32;
        let mut pos = Vec2::new(0.0, rim_radius);
        let mut taken: BTreeSet<StarId> = self.central.into_iter().collect();
        let mut assigned = Vec::with_capacity(players.len());

        for &player in players {
            let pick = self
                .index
                .nearest_where(pos, INDEX_HALF_EXTENT * 2.0, |id| !taken.contains(id))
                .copied();

            match pick.and_then(|id| self.stars.get_mut(&id)) {
                Some(star) => {
                    let [a, b, c] = fleet;
                    star.battlefield.set_home(Fleet::new(player, a, b, c));
                    taken.insert(star.id);
                    assigned.push((player, star.id));
                    debug!(player = %player, star = %star.id, at = %star.center(), "Spawn assigned");
                }
                None => warn!(player = %player, "No free star left for spawn"),
            }
            pos = pos.rotate(step);
        }

        for (_, id) in &assigned {
            self.mark_dirty(*id, SEVERITY_MAJOR);
        }
        assigned
    }

    /// Digest of the visible state: ids, bounds, build orders, owners and
    /// displayed counts. Wound fractions are left out so a client mirror
    /// matches the host once it has seen every star.
    pub fn state_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_star_map();
        hasher.update_u32(self.stars.len() as u32);
        for star in self.stars.values() {
            let mut rec = BytesMut::with_capacity(64);
            rec.put_i32(star.id.0);
            for edge in [star.bounds.left, star.bounds.top, star.bounds.right, star.bounds.bottom] {
                rec.put_f32(edge);
            }
            rec.put_i8(star.build_type as i8);
            let field = &star.battlefield;
            for fleet in std::iter::once(field.home()).chain(field.attackers()) {
                rec.put_i32(fleet.owner.0);
                for t in ShipType::ALL {
                    rec.put_u16(fleet.count(t));
                }
            }
            hasher.update_bytes(&rec);
        }
        hasher.finalize()
    }

    /// Pretty JSON dump for logs and tests.
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            stars: Vec<&'a Star>,
            dirty: Vec<StarId>,
            severity: u8,
        }
        serde_json::to_string_pretty(&Snapshot {
            stars: self.stars.values().collect(),
            dirty: self.dirty.iter().copied().collect(),
            severity: self.severity,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NEUTRAL: PlayerId = PlayerId(1_234_567);

    fn map_with(n: i32) -> StarMap {
        let mut map = StarMap::new(CombatRules::default());
        for i in 0..n {
            let center = Vec2::new(-2.0 + i as f32 * 0.5, (i % 3) as f32 * 0.4 - 0.4);
            map.insert(Star::new(StarId(100 + i), center, 0.08, Fleet::new(NEUTRAL, 5, 5, 5)))
                .unwrap();
        }
        map
    }

    #[test]
    fn test_insert_rejects_duplicates_and_outliers() {
        let mut map = map_with(2);
        let dup = Star::new(StarId(100), Vec2::ZERO, 0.1, Fleet::empty(NEUTRAL));
        assert!(matches!(map.insert(dup), Err(MapError::Duplicate(_))));
        let lost = Star::new(StarId(8), Vec2::new(f32::NAN, 0.0), 0.1, Fleet::empty(NEUTRAL));
        assert!(matches!(map.insert(lost), Err(MapError::OutOfBounds(_))));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_index_grows_for_distant_stars() {
        let mut map = map_with(2);
        let far = Vec2::new(23.0, -41.0);
        map.insert(Star::new(StarId(9), far, 0.1, Fleet::empty(NEUTRAL))).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(map.star_at(far).map(|s| s.id), Some(StarId(9)));
        assert_eq!(map.star_at(Vec2::new(-2.0, -0.4)).map(|s| s.id), Some(StarId(100)));
    }

    #[test]
    fn test_stars_in_range() {
        let map = map_with(6);
        let ids: BTreeSet<StarId> = map
            .stars_in(&Rect::new(-2.1, -1.0, -1.4, 1.0))
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, [StarId(100), StarId(101)].into());
    }

    #[test]
    fn test_flush_drains_and_resets() {
        let mut map = map_with(4);
        assert!(!map.is_dirty());
        map.mark_dirty(StarId(101), 1);
        map.mark_dirty(StarId(102), 2);
        map.mark_dirty(StarId(101), 1);
        map.mark_dirty(StarId(103), 0);
        assert_eq!(map.dirty_count(), 2);
        assert_eq!(map.severity(), 2);

        let payload = map.flush();
        assert_eq!(&payload[..3], &[0, 2, 2]);
        assert!(!map.is_dirty());
        assert_eq!(map.severity(), 0);

        map.mark_dirty(StarId(100), 1);
        assert!(map.is_dirty());
        assert_eq!(map.severity(), 1);
    }

    #[test]
    fn test_flush_spills_past_byte_budget() {
        let mut host = map_with(6);
        let mut mirror = StarMap::new(CombatRules::default());
        let record = host.get(StarId(100)).unwrap().encoded_len();
        host.make_all_dirty();

        let first = host.flush_within(3 + 2 * record);
        assert_eq!(host.dirty_count(), 4);
        assert_eq!(host.severity(), SEVERITY_MAJOR);
        assert_eq!(mirror.apply_delta(&first).unwrap().inserted, 2);

        // A budget smaller than one record still makes progress.
        mirror.apply_delta(&host.flush_within(1)).unwrap();
        assert_eq!(host.dirty_count(), 3);

        mirror.apply_delta(&host.flush()).unwrap();
        assert!(!host.is_dirty());
        assert_eq!(mirror.state_hash(), host.state_hash());
    }

    #[test]
    fn test_large_map_syncs_in_datagram_sized_flushes() {
        let mut host = StarMap::new(CombatRules::default());
        for i in 0..3000 {
            let center = Vec2::new((i % 60) as f32 * 0.3 - 9.0, (i / 60) as f32 * 0.3 - 7.5);
            host.insert(Star::new(StarId(i), center, 0.05, Fleet::new(NEUTRAL, 5, 5, 5)))
                .unwrap();
        }
        assert_eq!(host.len(), 3000);

        host.make_all_dirty();
        let mut mirror = StarMap::new(CombatRules::default());
        let mut flushes = 0;
        while host.is_dirty() {
            let payload = host.flush();
            assert!(payload.len() <= MAX_FLUSH_BYTES);
            mirror.apply_delta(&payload).unwrap();
            flushes += 1;
        }
        assert!(flushes > 1);
        assert_eq!(mirror.len(), 3000);
        assert_eq!(mirror.state_hash(), host.state_hash());
    }

    #[test]
    fn test_mirror_converges_from_deltas() {
        let mut host = map_with(6);
        let mut mirror = StarMap::new(CombatRules::default());

        host.make_all_dirty();
        let applied = mirror.apply_delta(&host.flush()).unwrap();
        assert_eq!(applied.inserted, 6);
        assert!(applied.needs_territory_refresh());
        assert_eq!(mirror.state_hash(), host.state_hash());

        if let Some(star) = host.get_mut(StarId(103)) {
            star.build_type = ShipType::B;
            star.battlefield.add_fleet(Fleet::new(PlayerId(4), 2, 0, 0));
        }
        host.mark_dirty(StarId(103), SEVERITY_MINOR);
        let applied = mirror.apply_delta(&host.flush()).unwrap();
        assert_eq!(applied, DeltaApplied { updated: 1, inserted: 0, severity: 1 });
        assert!(!applied.needs_territory_refresh());
        assert_eq!(mirror.state_hash(), host.state_hash());
        assert_eq!(mirror.len(), 6);
    }

    #[test]
    fn test_truncated_delta_is_an_error() {
        let mut host = map_with(2);
        host.make_all_dirty();
        let payload = host.flush();
        let mut mirror = StarMap::new(CombatRules::default());
        let cut = &payload[..payload.len() - 3];
        assert!(matches!(mirror.apply_delta(cut), Err(MapError::Wire(_))));
    }

    #[test]
    fn test_star_at_selects_nearest_within_radius() {
        let map = map_with(5);
        let point = map.get(StarId(102)).unwrap().center() + Vec2::new(0.05, 0.05);
        assert_eq!(map.star_at(point).map(|s| s.id), Some(StarId(102)));
        assert!(map.star_at(Vec2::new(4.0, 4.0)).is_none());
    }

    #[test]
    fn test_update_marks_battles_dirty() {
        let mut map = map_with(3);
        if let Some(star) = map.get_mut(StarId(101)) {
            star.battlefield.add_fleet(Fleet::new(PlayerId(2), 20, 20, 20));
        }
        let changed = map.update(1.0, NEUTRAL);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].0, StarId(101));
        assert!(map.is_dirty());
        assert_eq!(map.severity(), changed[0].1.severity());
    }

    #[test]
    fn test_spawns_are_distinct_and_skip_centre() {
        let mut map = map_with(8);
        map.set_central(StarId(104));
        let players = [PlayerId(1), PlayerId(2), PlayerId(3), PlayerId(4)];
        let assigned = map.set_spawns(&players, [20, 20, 0], 2.5);

        assert_eq!(assigned.len(), 4);
        let stars: BTreeSet<StarId> = assigned.iter().map(|(_, s)| *s).collect();
        assert_eq!(stars.len(), 4);
        assert!(!stars.contains(&StarId(104)));
        for (player, star) in &assigned {
            let s = map.get(*star).unwrap();
            assert_eq!(s.owner(), *player);
            assert_eq!(s.battlefield.home().counts(), [20, 20, 0]);
        }
        assert_eq!(map.severity(), SEVERITY_MAJOR);
    }

    #[test]
    fn test_snapshot_json_lists_stars() {
        let map = map_with(2);
        let json = map.snapshot_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["stars"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["stars"][0]["id"], 100);
    }
}
