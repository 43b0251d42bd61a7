//! Core primitives.
//!
//! Geometry, the spatial index, seeded randomness, the wire codec and
//! state digests. Nothing in here knows about players or fleets.

pub mod vec2;
pub mod rect;
pub mod quadtree;
pub mod rng;
pub mod codec;
pub mod hash;

// Re-export core types
pub use vec2::Vec2;
pub use rect::Rect;
pub use quadtree::QuadTree;
pub use rng::DeterministicRng;
pub use codec::{WireError, WireRead};
pub use hash::{StateHash, StateHasher};
