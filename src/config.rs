//! Configuration
//!
//! Host and client settings with defaults, plus environment overrides for
//! the binary.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::fleet::CombatRules;
use crate::game::galaxy::GalaxyConfig;
use crate::game::player::{PlayerId, DEFAULT_NEUTRAL_ID};
use crate::game::world::WorldConfig;
use crate::network::transport::TransportConfig;

/// Default UDP port of a host.
pub const DEFAULT_PORT: u16 = 37707;

/// Host settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum registered peers.
    pub max_clients: usize,
    /// Tick driver interval.
    pub tick_interval: Duration,
    /// Ping every this many ticks while a game runs.
    pub ping_every: u64,
    /// Drop peers silent for longer than this while a game runs.
    pub peer_timeout: Duration,
    /// Dispatch sequence numbers remembered per peer.
    pub dispatch_memory: usize,
    /// Galaxy shape.
    pub galaxy: GalaxyConfig,
    /// World settings.
    pub world: WorldConfig,
    /// Combat constants.
    pub rules: CombatRules,
    /// Socket settings.
    pub transport: TransportConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_clients: 4,
            tick_interval: Duration::from_millis(200),
            ping_every: 10,
            peer_timeout: Duration::from_secs(10),
            dispatch_memory: 64,
            galaxy: GalaxyConfig::default(),
            world: WorldConfig::default(),
            rules: CombatRules::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `STARSIEGE_PORT`, `STARSIEGE_MAX_CLIENTS`,
    /// `STARSIEGE_STARS`, `STARSIEGE_SEED` and `STARSIEGE_TICK_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let port = env_or("STARSIEGE_PORT", DEFAULT_PORT)?;
        config.bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        config.max_clients = env_or("STARSIEGE_MAX_CLIENTS", config.max_clients)?;
        config.galaxy.star_count = env_or("STARSIEGE_STARS", config.galaxy.star_count)?;
        config.galaxy.seed = env_or("STARSIEGE_SEED", config.galaxy.seed)?;
        let tick_ms = env_or("STARSIEGE_TICK_MS", config.tick_interval.as_millis() as u64)?;
        if tick_ms == 0 {
            return Err(ConfigError::Invalid { var: "STARSIEGE_TICK_MS", value: tick_ms.to_string() });
        }
        config.tick_interval = Duration::from_millis(tick_ms);

        Ok(config)
    }

    /// Simulated seconds per tick.
    pub fn tick_seconds(&self) -> f32 {
        self.tick_interval.as_secs_f32()
    }
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local bind address; port 0 picks a free one.
    pub bind_addr: SocketAddr,
    /// Display name sent in the profile.
    pub name: String,
    /// Bound on resolving and probing the host before any datagram is sent.
    pub reachability_timeout: Duration,
    /// Bound on the connect handshake.
    pub handshake_timeout: Duration,
    /// Events buffered per listener before slow listeners lag.
    pub listener_capacity: usize,
    /// Identity the host uses for the neutral owner.
    pub neutral_id: PlayerId,
    /// Combat constants, needed to decode fleets.
    pub rules: CombatRules,
    /// Fleet speed for the local mirror's animations.
    pub ship_speed: f32,
    /// Socket settings.
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            name: "Commander".to_string(),
            reachability_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            listener_capacity: 256,
            neutral_id: DEFAULT_NEUTRAL_ID,
            rules: CombatRules::default(),
            ship_speed: WorldConfig::default().ship_speed,
            transport: TransportConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable set but not parseable.
    #[error("Invalid value for {var}: {value:?}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },
}

fn env_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}
