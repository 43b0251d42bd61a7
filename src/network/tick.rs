//! Host Tick Driver
//!
//! Fixed-interval loop owned by the host. Before the game starts the
//! driver is ROAMING and does nothing. Once every peer is ready it is
//! LOCKED, and each tick:
//!
//! 1. drops peers that have gone silent
//! 2. advances combat, production and fleets in flight
//! 3. pings every peer every `ping_every` ticks
//! 4. flushes the dirty part of the map as one star-state-changed datagram

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::network::host::HostShared;
use crate::network::protocol::{Message, ORIGIN_NONE};

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverMode {
    /// Lobby. Reserved for discovery broadcasts.
    Roaming,
    /// Game running.
    Locked,
}

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Tick number.
    pub tick: u64,
    /// Peers dropped for silence.
    pub evicted: usize,
    /// Stars whose battlefield changed.
    pub changed: usize,
    /// Whether a ping went out.
    pub pinged: bool,
    /// Bytes of star delta broadcast, if any.
    pub flushed: Option<usize>,
}

/// Advances the host's world on a fixed interval.
pub(crate) struct TickDriver {
    shared: Arc<HostShared>,
    tick: u64,
}

impl TickDriver {
    pub(crate) fn new(shared: Arc<HostShared>) -> Self {
        Self { shared, tick: 0 }
    }

    /// Tick until `shutdown` flips.
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.shared.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.shared.config.tick_interval.as_millis() as u64, "Tick driver running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.step().await;
                    if summary.changed > 0 || summary.evicted > 0 {
                        debug!(?summary, "Tick");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(ticks = self.tick, "Tick driver stopped");
    }

    /// One tick.
    pub(crate) async fn step(&mut self) -> TickSummary {
        let tick = self.tick;
        self.tick += 1;
        let mut summary = TickSummary { tick, ..Default::default() };

        if *self.shared.mode.read().await == DriverMode::Roaming {
            trace!(tick, "Roaming");
            return summary;
        }

        summary.evicted = self.shared.evict_silent().await;

        let dt = self.shared.config.tick_seconds();
        let (report, delta) = {
            let mut world = self.shared.world.lock().await;
            let report = world.update(dt);
            let map = world.map_mut();
            let delta = map.is_dirty().then(|| map.flush());
            (report, delta)
        };
        summary.changed = report.changed.len();

        if tick % self.shared.config.ping_every.max(1) == 0 {
            trace!(tick, "Ping");
            self.shared.broadcast_message(&Message::Ping, ORIGIN_NONE).await;
            summary.pinged = true;
        }

        if let Some(delta) = delta {
            summary.flushed = Some(delta.len());
            self.shared
                .broadcast_message(&Message::StarStateChanged(delta), ORIGIN_NONE)
                .await;
        }

        summary
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    use tokio::sync::{Mutex, RwLock};

    use crate::config::HostConfig;
    use crate::game::galaxy::{self, GalaxyConfig};
    use crate::game::player::{Player, PlayerId};
    use crate::game::world::World;
    use crate::network::host::PeerEntry;
    use crate::network::transport::{Transport, TransportConfig};

    async fn driver(mode: DriverMode) -> (TickDriver, Transport) {
        let config = HostConfig {
            galaxy: GalaxyConfig { star_count: 10, ..Default::default() },
            peer_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let map = galaxy::generate(&config.galaxy, config.rules, config.world.neutral_id);
        let (transport, _) = Transport::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        let shared = HostShared {
            outbox: transport.outbox(),
            peers: RwLock::new(BTreeMap::new()),
            world: Mutex::new(World::new(map, config.world.clone())),
            mode: RwLock::new(mode),
            config,
        };
        (TickDriver::new(Arc::new(shared)), transport)
    }

    #[tokio::test]
    async fn test_roaming_does_nothing() {
        let (mut driver, transport) = driver(DriverMode::Roaming).await;
        driver.shared.world.lock().await.map_mut().make_all_dirty();

        let summary = driver.step().await;
        assert_eq!(summary, TickSummary { tick: 0, ..Default::default() });
        assert!(driver.shared.world.lock().await.map().is_dirty());
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_locked_pings_and_flushes() {
        let (mut driver, transport) = driver(DriverMode::Locked).await;
        driver.shared.world.lock().await.map_mut().make_all_dirty();

        let first = driver.step().await;
        assert!(first.pinged);
        assert!(first.flushed.is_some());
        assert!(!driver.shared.world.lock().await.map().is_dirty());

        // Neutral stars neither fight nor produce, so nothing is dirty.
        let second = driver.step().await;
        assert!(!second.pinged);
        assert_eq!(second.flushed, None);

        for _ in 2..10 {
            driver.step().await;
        }
        assert!(driver.step().await.pinged);
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_silent_peers_are_evicted() {
        let (mut driver, transport) = driver(DriverMode::Locked).await;
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut entry = PeerEntry::new(Player::new(PlayerId(3), 1, "quiet"));
        entry.last_seen = Instant::now() - Duration::from_secs(1);
        driver.shared.peers.write().await.insert(addr, entry);

        let summary = driver.step().await;
        assert_eq!(summary.evicted, 1);
        assert!(driver.shared.peers.read().await.is_empty());
        transport.stop().await;
    }
}
