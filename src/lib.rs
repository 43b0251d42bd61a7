//! # Starsiege Host Core
//!
//! Authoritative simulation and state sync for a real-time galaxy strategy
//! game. One host owns the galaxy, resolves combat, and streams the stars
//! that changed to every peer over UDP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    STARSIEGE HOST CORE                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec2.rs     - World-space vector                        │
//! │  ├── rect.rs     - Axis-aligned bounds                       │
//! │  ├── quadtree.rs - Point-region spatial index                │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  ├── codec.rs    - Big-endian wire helpers                   │
//! │  └── hash.rs     - Galaxy state digests                      │
//! │                                                              │
//! │  game/           - Simulation                                │
//! │  ├── player.rs   - Identities, neutral sentinel, roster      │
//! │  ├── fleet.rs    - Ship triangle and damage                  │
//! │  ├── battlefield.rs - Per-star combat and production         │
//! │  ├── star.rs     - Star entity and delta record              │
//! │  ├── starmap.rs  - All stars, dirty-set sync                 │
//! │  ├── galaxy.rs   - Spiral generation                         │
//! │  ├── transit.rs  - Fleets in flight                          │
//! │  └── world.rs    - Host authority and client mirror          │
//! │                                                              │
//! │  network/        - UDP session protocol                      │
//! │  ├── protocol.rs - Headers, framing, typed messages          │
//! │  ├── transport.rs- Socket with inbound/outbound tasks        │
//! │  ├── client.rs   - Peer communicator                         │
//! │  ├── host.rs     - Host communicator, admission, relay       │
//! │  └── tick.rs     - Fixed-interval tick driver                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sync Model
//!
//! - Stars changed since the last flush form the dirty set
//! - Each tick the host serializes the dirty set into one datagram
//! - Peers apply deltas in place; unknown stars are created on sight
//! - Full values are resent, never diffs, so lost datagrams heal

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{ClientConfig, ConfigError, HostConfig};
pub use core::rng::DeterministicRng;
pub use game::{Fleet, Player, PlayerId, ShipType, StarId, StarMap, World};
pub use network::{ConnectError, GameClient, GameHost, HostError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
