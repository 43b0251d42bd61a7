//! World State
//!
//! [`World`] is the host's authority: the star map, fleets in flight and
//! the rules that govern them. Gameplay requests from peers are validated
//! here before they touch state.
//!
//! [`ClientWorld`] is a peer's mirror. It never simulates combat; it only
//! applies deltas from the host and animates relayed dispatches.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::{Rect, Vec2};
use crate::game::battlefield::BattleOutcome;
use crate::game::fleet::{Fleet, ShipType};
use crate::game::player::{PlayerId, DEFAULT_NEUTRAL_ID};
use crate::game::star::{Star, StarId};
use crate::game::starmap::{DeltaApplied, MapError, StarMap, SEVERITY_MINOR};
use crate::game::transit::{Transit, Transits};

/// World-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Identity of the neutral owner.
    pub neutral_id: PlayerId,
    /// Travel speed of dispatched fleets, world units per second.
    pub ship_speed: f32,
    /// Starting fleet for each player, per type.
    pub spawn_fleet: [u16; 3],
    /// Radius of the circle spawn points rotate around.
    pub spawn_radius: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            neutral_id: DEFAULT_NEUTRAL_ID,
            ship_speed: 0.3,
            spawn_fleet: [20, 20, 0],
            spawn_radius: 2.5,
        }
    }
}

/// Request to move ships between stars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOrder {
    /// Star the ships leave.
    pub source: StarId,
    /// Ships to send; the owner is the requesting player.
    pub fleet: Fleet,
    /// Star the ships head for.
    pub dest: StarId,
}

/// Request to change what a star produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildOrder {
    /// Star to change.
    pub star: StarId,
    /// New production type.
    pub build_type: ShipType,
}

/// Why a gameplay request was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchRejected {
    /// Fleet or star belongs to someone else.
    #[error("{sender} does not own this")]
    NotOwner {
        /// Requesting player
        sender: PlayerId,
    },

    /// Referenced star does not exist.
    #[error("unknown {0}")]
    UnknownStar(StarId),

    /// Source and destination are the same star.
    #[error("source and destination are both {0}")]
    SameStar(StarId),

    /// Nothing to send.
    #[error("empty fleet")]
    EmptyFleet,

    /// Sender has no ships at the source.
    #[error("no fleet at {0}")]
    NoFleetAtSource(StarId),

    /// Sender asked for more ships than are present.
    #[error("requested {requested:?}, only {available:?} at source")]
    Insufficient {
        /// Requested counts A, B, C
        requested: [u16; 3],
        /// Available counts A, B, C
        available: [u16; 3],
    },
}

/// What one [`World::update`] changed.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Stars whose battlefield reported a change.
    pub changed: Vec<(StarId, BattleOutcome)>,
    /// Fleets that reached their destination.
    pub arrivals: Vec<Transit>,
}

// =============================================================================
// HOST WORLD
// =============================================================================

/// Authoritative game state.
#[derive(Debug)]
pub struct World {
    map: StarMap,
    transits: Transits,
    config: WorldConfig,
}

impl World {
    /// Wrap a generated map.
    pub fn new(map: StarMap, config: WorldConfig) -> Self {
        Self { map, transits: Transits::new(), config }
    }

    /// The star map.
    pub fn map(&self) -> &StarMap {
        &self.map
    }

    /// Mutable star map (dirty marking, flushing).
    pub fn map_mut(&mut self) -> &mut StarMap {
        &mut self.map
    }

    /// Fleets in flight.
    pub fn transits(&self) -> &Transits {
        &self.transits
    }

    /// Settings.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Advance combat, production and travel by `dt` seconds.
    pub fn update(&mut self, dt: f32) -> TickReport {
        let changed = self.map.update(dt, self.config.neutral_id);
        for (id, outcome) in &changed {
            if *outcome == BattleOutcome::OwnershipChanged {
                if let Some(star) = self.map.get(*id) {
                    info!(star = %id, owner = %star.owner(), "Star changed hands");
                }
            }
        }

        let arrivals = self.transits.advance(dt, self.config.ship_speed);
        for transit in &arrivals {
            if let Some(star) = self.map.get_mut(transit.dest) {
                star.battlefield.add_fleet(transit.fleet.clone());
                debug!(star = %transit.dest, owner = %transit.fleet.owner, "Fleet arrived");
            }
            self.map.mark_dirty(transit.dest, SEVERITY_MINOR);
        }

        TickReport { changed, arrivals }
    }

    /// Validate and apply a dispatch from `sender`.
    ///
    /// On success the ships leave the source at once and the source is
    /// marked dirty. On rejection nothing changes.
    pub fn dispatch(&mut self, order: &DispatchOrder, sender: PlayerId) -> Result<(), DispatchRejected> {
        if order.fleet.owner != sender {
            return Err(DispatchRejected::NotOwner { sender });
        }
        if order.source == order.dest {
            return Err(DispatchRejected::SameStar(order.source));
        }
        let target = self
            .map
            .get(order.dest)
            .map(Star::center)
            .ok_or(DispatchRejected::UnknownStar(order.dest))?;
        if order.fleet.is_empty() {
            return Err(DispatchRejected::EmptyFleet);
        }

        let source = self
            .map
            .get_mut(order.source)
            .ok_or(DispatchRejected::UnknownStar(order.source))?;
        let from = source.center();
        let available = source
            .battlefield
            .fleet_of_mut(sender)
            .ok_or(DispatchRejected::NoFleetAtSource(order.source))?;
        if !order.fleet.is_subset_of(available) {
            return Err(DispatchRejected::Insufficient {
                requested: order.fleet.counts(),
                available: available.counts(),
            });
        }
        let launched = available.take(&order.fleet);
        source.battlefield.prune_attacker(sender);

        self.map.mark_dirty(order.source, SEVERITY_MINOR);
        self.transits
            .launch(launched, order.source, from, order.dest, target);
        Ok(())
    }

    /// Apply a build order from `sender`, who must own the star.
    pub fn apply_build_order(&mut self, order: BuildOrder, sender: PlayerId) -> Result<(), DispatchRejected> {
        let star = self
            .map
            .get_mut(order.star)
            .ok_or(DispatchRejected::UnknownStar(order.star))?;
        if star.owner() != sender {
            return Err(DispatchRejected::NotOwner { sender });
        }
        if star.build_type != order.build_type {
            star.build_type = order.build_type;
            self.map.mark_dirty(order.star, SEVERITY_MINOR);
        }
        Ok(())
    }

    /// Seat the given players on their starting stars.
    pub fn assign_spawns(&mut self, players: &[PlayerId]) -> Vec<(PlayerId, StarId)> {
        self.map
            .set_spawns(players, self.config.spawn_fleet, self.config.spawn_radius)
    }
}

// =============================================================================
// CLIENT MIRROR
// =============================================================================

/// A peer's copy of the galaxy, fed by host deltas.
#[derive(Debug)]
pub struct ClientWorld {
    map: StarMap,
    transits: Transits,
    ship_speed: f32,
    territory_stale: bool,
}

impl ClientWorld {
    /// Empty mirror.
    pub fn new(map: StarMap, ship_speed: f32) -> Self {
        Self { map, transits: Transits::new(), ship_speed, territory_stale: false }
    }

    /// The mirrored map.
    pub fn map(&self) -> &StarMap {
        &self.map
    }

    /// Fleets being animated.
    pub fn transits(&self) -> &Transits {
        &self.transits
    }

    /// Apply a star-state-changed payload.
    pub fn apply_delta(&mut self, payload: &[u8]) -> Result<DeltaApplied, MapError> {
        let applied = self.map.apply_delta(payload)?;
        if applied.needs_territory_refresh() {
            self.territory_stale = true;
        }
        Ok(applied)
    }

    /// Start animating a relayed dispatch. Ignored if either star is unknown.
    pub fn observe_dispatch(&mut self, order: &DispatchOrder) {
        let (Some(src), Some(dst)) = (self.map.get(order.source), self.map.get(order.dest)) else {
            debug!(source = %order.source, dest = %order.dest, "Dispatch between unknown stars");
            return;
        };
        let (from, to) = (src.center(), dst.center());
        self.transits
            .launch(order.fleet.clone(), order.source, from, order.dest, to);
    }

    /// Advance animations; arrivals are dropped, the host reports their effect.
    pub fn update(&mut self, dt: f32) {
        self.transits.advance(dt, self.ship_speed);
    }

    /// Star under a point, for selection.
    pub fn star_at(&self, point: Vec2) -> Option<&Star> {
        self.map.star_at(point)
    }

    /// Stars inside a view rectangle, for culling.
    pub fn stars_in(&self, view: &Rect) -> Vec<&Star> {
        self.map.stars_in(view)
    }

    /// Whether ownership outlines need recomputing; clears the flag.
    pub fn take_territory_refresh(&mut self) -> bool {
        std::mem::take(&mut self.territory_stale)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fleet::CombatRules;
    use crate::game::galaxy::{generate, GalaxyConfig};

    const P1: PlayerId = PlayerId(11);
    const P2: PlayerId = PlayerId(22);

    fn world() -> (World, StarId, StarId) {
        let map = generate(&GalaxyConfig::default(), CombatRules::default(), DEFAULT_NEUTRAL_ID);
        let mut world = World::new(map, WorldConfig::default());
        let spawns = world.assign_spawns(&[P1, P2]);
        world.map_mut().flush();
        (world, spawns[0].1, spawns[1].1)
    }

    fn order(source: StarId, dest: StarId, owner: PlayerId, a: u16, b: u16, c: u16) -> DispatchOrder {
        DispatchOrder { source, fleet: Fleet::new(owner, a, b, c), dest }
    }

    #[test]
    fn test_valid_dispatch_subtracts_and_launches() {
        let (mut world, home, enemy) = world();
        world.dispatch(&order(home, enemy, P1, 5, 5, 0), P1).unwrap();

        let src = world.map().get(home).unwrap();
        assert_eq!(src.battlefield.home().counts(), [15, 15, 0]);
        assert!(world.map().is_dirty());
        assert_eq!(world.transits().len(), 1);
    }

    #[test]
    fn test_overdraw_rejected_without_change() {
        let (mut world, home, enemy) = world();
        let before = world.map().get(home).unwrap().battlefield.home().clone();

        let err = world.dispatch(&order(home, enemy, P1, 21, 0, 0), P1).unwrap_err();
        assert!(matches!(err, DispatchRejected::Insufficient { .. }));
        assert_eq!(world.map().get(home).unwrap().battlefield.home(), &before);
        assert!(!world.map().is_dirty());
        assert!(world.transits().is_empty());
    }

    #[test]
    fn test_wounded_source_cannot_mint_ships() {
        let (mut world, home, enemy) = world();
        world
            .map_mut()
            .get_mut(home)
            .unwrap()
            .battlefield
            .set_home(Fleet::from_counts(P1, [2.5, 0.0, 0.0]));

        // 2.5 displays as 3, so the request passes the whole-ship check.
        world.dispatch(&order(home, enemy, P1, 3, 0, 0), P1).unwrap();
        let sent = &world.transits().iter().next().unwrap().fleet;
        assert!((sent.raw(ShipType::A) - 2.5).abs() < 1e-6);
        assert_eq!(world.map().get(home).unwrap().battlefield.home().raw(ShipType::A), 0.0);
    }

    #[test]
    fn test_dispatch_authorization() {
        let (mut world, home, enemy) = world();
        // Claiming someone else's ships.
        assert!(matches!(
            world.dispatch(&order(home, enemy, P1, 1, 0, 0), P2),
            Err(DispatchRejected::NotOwner { .. })
        ));
        // Sending from a star where the sender has nothing.
        assert!(matches!(
            world.dispatch(&order(enemy, home, P1, 1, 0, 0), P1),
            Err(DispatchRejected::NoFleetAtSource(_))
        ));
        assert!(matches!(
            world.dispatch(&order(home, home, P1, 1, 0, 0), P1),
            Err(DispatchRejected::SameStar(_))
        ));
        assert!(matches!(
            world.dispatch(&order(home, StarId(-1), P1, 1, 0, 0), P1),
            Err(DispatchRejected::UnknownStar(_))
        ));
        assert!(matches!(
            world.dispatch(&order(home, enemy, P1, 0, 0, 0), P1),
            Err(DispatchRejected::EmptyFleet)
        ));
    }

    #[test]
    fn test_arrival_joins_destination() {
        let (mut world, home, _) = world();
        let other = world
            .map()
            .iter()
            .find(|s| s.id != home && s.owner() == DEFAULT_NEUTRAL_ID)
            .map(|s| s.id)
            .unwrap();

        world.dispatch(&order(home, other, P1, 2, 0, 0), P1).unwrap();
        world.map_mut().flush();

        let mut arrived = false;
        for _ in 0..200 {
            let report = world.update(0.2);
            if !report.arrivals.is_empty() {
                arrived = true;
                assert!(world.map().get(other).unwrap().battlefield.fleet_of(P1).is_some());
                assert!(world.map().is_dirty());
                break;
            }
        }
        assert!(arrived);

        // A second wave to the same star merges with the first.
        world.dispatch(&order(home, other, P1, 1, 0, 0), P1).unwrap();
        for _ in 0..200 {
            world.update(0.2);
            if world.transits().is_empty() {
                break;
            }
        }
        assert!(world.transits().is_empty());
    }

    #[test]
    fn test_build_order_requires_ownership() {
        let (mut world, home, enemy) = world();
        world.apply_build_order(BuildOrder { star: home, build_type: ShipType::C }, P1).unwrap();
        assert_eq!(world.map().get(home).unwrap().build_type, ShipType::C);
        assert_eq!(world.map().severity(), SEVERITY_MINOR);

        assert!(world
            .apply_build_order(BuildOrder { star: enemy, build_type: ShipType::C }, P1)
            .is_err());
    }

    #[test]
    fn test_client_mirror_tracks_host() {
        let (mut world, home, enemy) = world();
        let mut mirror = ClientWorld::new(StarMap::new(CombatRules::default()), 0.3);

        world.map_mut().make_all_dirty();
        let payload = world.map_mut().flush();
        mirror.apply_delta(&payload).unwrap();
        assert!(mirror.take_territory_refresh());
        assert!(!mirror.take_territory_refresh());
        assert_eq!(mirror.map().state_hash(), world.map().state_hash());

        let o = order(home, enemy, P1, 1, 1, 0);
        world.dispatch(&o, P1).unwrap();
        mirror.observe_dispatch(&o);
        assert_eq!(mirror.transits().len(), 1);

        let centre = mirror.map().get(home).unwrap().center();
        assert_eq!(mirror.star_at(centre).map(|s| s.id), Some(home));
        let view = Rect::around(centre, 0.01);
        assert!(mirror.stars_in(&view).iter().any(|s| s.id == home));
    }
}
