//! Fleets in Flight
//!
//! A dispatched fleet leaves its source star immediately and travels in a
//! straight line to the destination at a fixed speed. On the host, arrival
//! merges the fleet into the destination battlefield. Client mirrors keep
//! transits for display only.

use serde::Serialize;

use crate::core::Vec2;
use crate::game::fleet::Fleet;
use crate::game::star::StarId;

/// One fleet travelling between stars.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transit {
    /// Ships on board.
    pub fleet: Fleet,
    /// Star the fleet left.
    pub source: StarId,
    /// Star the fleet is heading for.
    pub dest: StarId,
    /// Current position.
    pub pos: Vec2,
    /// Destination centre.
    pub target: Vec2,
}

impl Transit {
    /// Remaining distance.
    pub fn remaining(&self) -> f32 {
        self.pos.distance(self.target)
    }
}

/// All fleets currently in flight.
#[derive(Clone, Debug, Default)]
pub struct Transits {
    active: Vec<Transit>,
}

impl Transits {
    /// No fleets in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transit from `from` to `to`.
    pub fn launch(&mut self, fleet: Fleet, source: StarId, from: Vec2, dest: StarId, to: Vec2) {
        self.active.push(Transit { fleet, source, dest, pos: from, target: to });
    }

    /// Move every fleet `speed * dt` closer to its target and return the
    /// ones that arrived, in launch order.
    pub fn advance(&mut self, dt: f32, speed: f32) -> Vec<Transit> {
        let step = speed * dt;
        let mut arrived = Vec::new();
        self.active.retain_mut(|t| {
            let (pos, reached) = t.pos.step_towards(t.target, step);
            t.pos = pos;
            if reached {
                arrived.push(t.clone());
            }
            !reached
        });
        arrived
    }

    /// Fleets in flight.
    pub fn iter(&self) -> impl Iterator<Item = &Transit> {
        self.active.iter()
    }

    /// Number in flight.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
