//! Game Logic Module
//!
//! Everything the host simulates and peers mirror.
//!
//! ## Module Structure
//!
//! - `player`: Identities, the neutral sentinel, per-session roster
//! - `fleet`: Ship types, fleets, damage resolution
//! - `battlefield`: Per-star combat and production
//! - `star`: Star entity and its delta record
//! - `starmap`: All stars, spatial lookup, dirty-set sync
//! - `galaxy`: Spiral galaxy generation
//! - `transit`: Fleets in flight
//! - `world`: Host authority and client mirror

pub mod player;
pub mod fleet;
pub mod battlefield;
pub mod star;
pub mod starmap;
pub mod galaxy;
pub mod transit;
pub mod world;

// Re-export key types
pub use player::{Player, PlayerId, Roster};
pub use fleet::{CombatRules, Fleet, ShipType};
pub use battlefield::{BattleField, BattleOutcome};
pub use star::{Star, StarId};
pub use starmap::{DeltaApplied, MapError, StarMap};
pub use galaxy::GalaxyConfig;
pub use world::{BuildOrder, ClientWorld, DispatchOrder, DispatchRejected, World, WorldConfig};
