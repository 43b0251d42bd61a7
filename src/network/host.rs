//! Host Communicator
//!
//! The host owns the galaxy. It admits peers, keeps the registry of who
//! sits where, validates gameplay requests against the [`World`], and
//! relays what passes. A [`TickDriver`] advances the simulation and
//! streams the dirty part of the map to every peer.
//!
//! Message handling:
//!
//! | Message | Action |
//! |---|---|
//! | request-connection | admit (smallest free slot), refuse when full or started |
//! | disconnect | drop the peer, tell the others |
//! | submitted-player-profile | update the record, rebroadcast every profile |
//! | fleet-dispatched | validate, apply, relay verbatim |
//! | new-build-order | validate, apply, never relayed |
//! | request-game-start | mark ready; start once everyone is |
//! | request-map | mark every star dirty |
//! | pong | liveness only |
//!
//! Anything else from a registered peer is a protocol violation and ends
//! that peer's session.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::HostConfig;
use crate::core::hash::{short_hex, StateHash};
use crate::game::galaxy;
use crate::game::player::{Player, PlayerId};
use crate::game::world::World;
use crate::network::protocol::{GameEvent, Message, ProtocolError, ORIGIN_NONE};
use crate::network::tick::{DriverMode, TickDriver};
use crate::network::transport::{Datagram, Outbox, Transport, TransportError};

/// Largest table a host can seat. Profiles carry the slot as a signed byte.
pub const MAX_SEATS: usize = i8::MAX as usize;

/// Host errors.
#[derive(Debug, Error)]
pub enum HostError {
    /// Socket setup failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Settings that cannot work.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// One registered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// The peer's profile; the slot is host-assigned.
    pub player: Player,
    /// Last datagram from this peer.
    pub last_seen: Instant,
    recent_seqs: VecDeque<u32>,
}

impl PeerEntry {
    pub(crate) fn new(player: Player) -> Self {
        Self { player, last_seen: Instant::now(), recent_seqs: VecDeque::new() }
    }

    /// Record a dispatch sequence number. False if it was seen recently.
    fn remember(&mut self, seq: u32, capacity: usize) -> bool {
        if self.recent_seqs.contains(&seq) {
            return false;
        }
        if self.recent_seqs.len() >= capacity.max(1) {
            self.recent_seqs.pop_front();
        }
        self.recent_seqs.push_back(seq);
        true
    }
}

/// State shared by the receive task, the tick driver and the handle.
pub(crate) struct HostShared {
    pub(crate) config: HostConfig,
    pub(crate) outbox: Outbox,
    pub(crate) peers: RwLock<BTreeMap<SocketAddr, PeerEntry>>,
    pub(crate) world: Mutex<World>,
    pub(crate) mode: RwLock<DriverMode>,
}

impl HostShared {
    /// Unicast `data` to every registered peer.
    pub(crate) async fn broadcast(&self, data: Bytes) {
        let addrs: Vec<SocketAddr> = self.peers.read().await.keys().copied().collect();
        for addr in addrs {
            self.outbox.send(addr, data.clone());
        }
    }

    /// Frame and broadcast a message.
    pub(crate) async fn broadcast_message(&self, msg: &Message, origin: u8) {
        let data = msg.to_event(origin, &self.config.rules).encode();
        self.broadcast(data).await;
    }

    fn send_message(&self, to: SocketAddr, msg: &Message, origin: u8) {
        self.outbox
            .send(to, msg.to_event(origin, &self.config.rules).encode());
    }

    /// Remove a peer and tell the rest, tagging the notice with its slot.
    pub(crate) async fn drop_peer(&self, addr: SocketAddr, reason: &str) {
        let removed = self.peers.write().await.remove(&addr);
        if let Some(entry) = removed {
            info!(%addr, player = %entry.player, reason, "Peer left");
            self.broadcast_message(&Message::Disconnected, entry.player.slot)
                .await;
        }
    }

    /// Drop a misbehaving peer. It gets the notice too, so it knows the
    /// session is over.
    async fn expel(&self, addr: SocketAddr, reason: &str) {
        let slot = self.peers.read().await.get(&addr).map(|p| p.player.slot);
        if let Some(slot) = slot {
            self.send_message(addr, &Message::Disconnected, slot);
        }
        self.drop_peer(addr, reason).await;
    }

    /// Drop every peer silent for longer than the configured timeout.
    pub(crate) async fn evict_silent(&self) -> usize {
        let timeout = self.config.peer_timeout;
        let stale: Vec<SocketAddr> = self
            .peers
            .read()
            .await
            .iter()
            .filter(|(_, p)| p.last_seen.elapsed() > timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            self.drop_peer(*addr, "timed out").await;
        }
        stale.len()
    }

    /// Handle one datagram from the inbound queue.
    pub(crate) async fn handle_datagram(&self, from: SocketAddr, data: Bytes) {
        let known = {
            let mut peers = self.peers.write().await;
            match peers.get_mut(&from) {
                Some(entry) => {
                    entry.last_seen = Instant::now();
                    true
                }
                None => false,
            }
        };

        let decoded = GameEvent::decode(data.clone())
            .and_then(|event| Message::decode(&event, &self.config.rules));
        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) if known => return self.violation(from, e).await,
            Err(e) => {
                debug!(%from, error = %e, "Ignoring garbage from unknown address");
                return;
            }
        };

        if !known {
            if matches!(msg, Message::RequestConnection) {
                self.admit(from).await;
            } else {
                debug!(%from, header = ?msg.header(), "Ignoring message from unregistered address");
            }
            return;
        }

        match msg {
            Message::RequestConnection => self.readmit(from).await,
            Message::Disconnected => self.drop_peer(from, "disconnected").await,
            Message::SubmittedPlayerProfile(profile) => self.update_profile(from, profile).await,
            Message::FleetDispatched { order, seq } => {
                let Some((sender, slot)) = self.sender_of(from, seq).await else {
                    debug!(%from, ?seq, "Duplicate dispatch dropped");
                    return;
                };
                let result = self.world.lock().await.dispatch(&order, sender);
                match result {
                    Ok(()) => {
                        debug!(%from, slot, source = %order.source, dest = %order.dest, "Dispatch relayed");
                        self.broadcast(data).await;
                    }
                    Err(e) => debug!(%from, slot, reason = %e, "Dispatch rejected"),
                }
            }
            Message::NewBuildOrder(order) => {
                let Some((sender, _)) = self.sender_of(from, None).await else { return };
                if let Err(e) = self.world.lock().await.apply_build_order(order, sender) {
                    debug!(%from, reason = %e, "Build order rejected");
                }
            }
            Message::RequestGameStart => self.request_start(from).await,
            Message::RequestMap => {
                self.world.lock().await.map_mut().make_all_dirty();
                debug!(%from, "Full map requested");
            }
            Message::Pong => {}
            other @ (Message::BroadcastAddress
            | Message::ConnectionRefused
            | Message::ConnectionRefusedFull
            | Message::GameStart
            | Message::RequestPlayerProfile(_)
            | Message::StarStateChanged(_)
            | Message::Ping) => {
                warn!(%from, header = ?other.header(), "Host-only message from peer");
                self.expel(from, "protocol violation").await;
            }
        }
    }

    async fn violation(&self, from: SocketAddr, error: ProtocolError) {
        warn!(%from, %error, "Protocol violation");
        self.expel(from, "protocol violation").await;
    }

    /// Identity and slot of a registered sender. With a sequence number,
    /// returns `None` if that number was already seen from this peer.
    async fn sender_of(&self, from: SocketAddr, seq: Option<u32>) -> Option<(PlayerId, u8)> {
        let mut peers = self.peers.write().await;
        let entry = peers.get_mut(&from)?;
        if let Some(seq) = seq {
            if !entry.remember(seq, self.config.dispatch_memory) {
                return None;
            }
        }
        Some((entry.player.id, entry.player.slot))
    }

    #[instrument(skip(self))]
    async fn admit(&self, from: SocketAddr) {
        if *self.mode.read().await == DriverMode::Locked {
            info!(%from, "Refusing connection, game already started");
            self.send_message(from, &Message::ConnectionRefused, ORIGIN_NONE);
            return;
        }

        let seat = {
            let mut peers = self.peers.write().await;
            if peers.len() >= self.config.max_clients {
                None
            } else {
                let slot = free_slot(&peers);
                let placeholder = Player::new(
                    PlayerId::random(&mut rand::thread_rng(), self.config.world.neutral_id),
                    slot,
                    "",
                );
                peers.insert(from, PeerEntry::new(placeholder.clone()));
                Some(placeholder)
            }
        };

        match seat {
            Some(player) => {
                info!(%from, slot = player.slot, "Peer admitted");
                let slot = player.slot;
                self.send_message(from, &Message::RequestPlayerProfile(player), slot);
            }
            None => {
                info!(%from, max = self.config.max_clients, "Refusing connection, host full");
                self.send_message(from, &Message::ConnectionRefusedFull, ORIGIN_NONE);
            }
        }
    }

    /// A registered peer asked again, most likely because our reply was lost.
    async fn readmit(&self, from: SocketAddr) {
        let player = self.peers.read().await.get(&from).map(|e| e.player.clone());
        if let Some(player) = player {
            debug!(%from, slot = player.slot, "Repeated join request");
            let slot = player.slot;
            self.send_message(from, &Message::RequestPlayerProfile(player), slot);
        }
    }

    async fn update_profile(&self, from: SocketAddr, profile: Player) {
        let profiles: Vec<Player> = {
            let mut peers = self.peers.write().await;
            let clash = profile.id == self.config.world.neutral_id
                || peers.iter().any(|(a, e)| *a != from && e.player.id == profile.id);
            if clash {
                warn!(%from, id = %profile.id, "Profile identity already taken");
                return;
            }
            let Some(entry) = peers.get_mut(&from) else { return };
            entry.player.id = profile.id;
            entry.player.name = profile.name;
            debug!(%from, player = %entry.player, "Profile updated");
            peers.values().map(|e| e.player.clone()).collect()
        };

        for player in profiles {
            let slot = player.slot;
            self.broadcast_message(&Message::SubmittedPlayerProfile(player), slot)
                .await;
        }
    }

    async fn request_start(&self, from: SocketAddr) {
        let ready: Option<Vec<Player>> = {
            let mut peers = self.peers.write().await;
            if let Some(entry) = peers.get_mut(&from) {
                entry.player.start_requested = true;
            }
            peers
                .values()
                .all(|e| e.player.start_requested)
                .then(|| peers.values().map(|e| e.player.clone()).collect())
        };
        let Some(mut players) = ready else { return };

        {
            let mut mode = self.mode.write().await;
            if *mode == DriverMode::Locked {
                return;
            }
            *mode = DriverMode::Locked;
        }

        players.sort_by_key(|p| p.slot);
        let ids: Vec<PlayerId> = players.iter().map(|p| p.id).collect();
        let spawns = self.world.lock().await.assign_spawns(&ids);
        for (player, star) in &spawns {
            debug!(player = %player, %star, "Spawn assigned");
        }
        info!(players = players.len(), "Game started");
        self.broadcast_message(&Message::GameStart, ORIGIN_NONE).await;
    }
}

/// Smallest slot ≥ 1 nobody holds.
fn free_slot(peers: &BTreeMap<SocketAddr, PeerEntry>) -> u8 {
    let mut slot = 1u8;
    while peers.values().any(|p| p.player.slot == slot) {
        slot += 1;
    }
    slot
}

// =============================================================================
// HOST HANDLE
// =============================================================================

/// A running host.
pub struct GameHost {
    shared: Arc<HostShared>,
    transport: Transport,
    shutdown_tx: watch::Sender<bool>,
    receive_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
}

impl GameHost {
    /// Generate the galaxy, bind the socket and start the tasks.
    #[instrument(skip(config), fields(bind = %config.bind_addr))]
    pub async fn start(config: HostConfig) -> Result<Self, HostError> {
        if config.max_clients == 0 || config.max_clients > MAX_SEATS {
            return Err(HostError::InvalidConfig(format!(
                "max_clients must be 1..={MAX_SEATS}, got {}",
                config.max_clients
            )));
        }
        if config.tick_interval.is_zero() {
            return Err(HostError::InvalidConfig("tick interval is zero".into()));
        }

        let map = galaxy::generate(&config.galaxy, config.rules, config.world.neutral_id);
        let world = World::new(map, config.world.clone());

        let (transport, inbound) = Transport::bind(config.bind_addr, config.transport.clone()).await?;
        let shared = Arc::new(HostShared {
            outbox: transport.outbox(),
            peers: RwLock::new(BTreeMap::new()),
            world: Mutex::new(world),
            mode: RwLock::new(DriverMode::Roaming),
            config,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receive_task = tokio::spawn(run_receive(shared.clone(), inbound));
        let tick_task = tokio::spawn(TickDriver::new(shared.clone()).run(shutdown_rx));

        info!(addr = %transport.local_addr(), max_clients = shared.config.max_clients, "Host started");
        Ok(Self { shared, transport, shutdown_tx, receive_task, tick_task })
    }

    /// Address peers connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Registered peer count.
    pub async fn peer_count(&self) -> usize {
        self.shared.peers.read().await.len()
    }

    /// Registered profiles in slot order.
    pub async fn peers(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .shared
            .peers
            .read()
            .await
            .values()
            .map(|e| e.player.clone())
            .collect();
        players.sort_by_key(|p| p.slot);
        players
    }

    /// Current driver mode.
    pub async fn mode(&self) -> DriverMode {
        *self.shared.mode.read().await
    }

    /// Lock the world for inspection.
    pub async fn world(&self) -> MutexGuard<'_, World> {
        self.shared.world.lock().await
    }

    /// Digest of the authoritative map.
    pub async fn state_hash(&self) -> StateHash {
        self.shared.world.lock().await.map().state_hash()
    }

    /// Stop ticking, drain pending datagrams, close the socket.
    #[instrument(skip(self))]
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.tick_task.await;
        let hash = self.shared.world.lock().await.map().state_hash();
        self.transport.stop().await;
        let _ = self.receive_task.await;
        info!(state = %short_hex(&hash), "Host stopped");
    }
}

async fn run_receive(shared: Arc<HostShared>, mut inbound: mpsc::Receiver<Datagram>) {
    while let Some((from, data)) = inbound.recv().await {
        shared.handle_datagram(from, data).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::galaxy::GalaxyConfig;
    use crate::game::player::DEFAULT_NEUTRAL_ID;
    use crate::network::protocol::Header;
    use crate::network::transport::TransportConfig;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_config(max_clients: usize) -> HostConfig {
        HostConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_clients,
            tick_interval: Duration::from_millis(20),
            galaxy: GalaxyConfig { star_count: 12, ..Default::default() },
            transport: TransportConfig {
                drain_attempts: 2,
                drain_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct Peer {
        transport: Transport,
        inbound: mpsc::Receiver<Datagram>,
        host: SocketAddr,
    }

    impl Peer {
        async fn new(host: SocketAddr) -> Self {
            let (transport, inbound) =
                Transport::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
                    .await
                    .unwrap();
            Self { transport, inbound, host }
        }

        fn send(&self, msg: Message, origin: u8) {
            let data = msg.to_event(origin, &Default::default()).encode();
            self.transport.send(self.host, data);
        }

        /// Next message with the given header, skipping pings and others.
        async fn expect(&mut self, header: Header) -> (u8, Message) {
            loop {
                let (_, data) = timeout(Duration::from_secs(2), self.inbound.recv())
                    .await
                    .expect("timed out")
                    .expect("closed");
                let event = GameEvent::decode(data).unwrap();
                if event.header == header {
                    let msg = Message::decode(&event, &Default::default()).unwrap();
                    return (event.origin, msg);
                }
            }
        }
    }

    #[test]
    fn test_peer_remembers_recent_sequences() {
        let mut entry = PeerEntry::new(Player::new(PlayerId(1), 1, "a"));
        assert!(entry.remember(5, 2));
        assert!(!entry.remember(5, 2));
        assert!(entry.remember(6, 2));
        assert!(entry.remember(7, 2));
        // 5 has been pushed out of the window.
        assert!(entry.remember(5, 2));
    }

    #[test]
    fn test_free_slot_fills_gaps() {
        let mut peers = BTreeMap::new();
        assert_eq!(free_slot(&peers), 1);
        for (port, slot) in [(1000, 1), (1001, 3)] {
            let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
            peers.insert(addr, PeerEntry::new(Player::new(PlayerId(port as i32), slot, "")));
        }
        assert_eq!(free_slot(&peers), 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_config() {
        assert!(matches!(
            GameHost::start(test_config(0)).await,
            Err(HostError::InvalidConfig(_))
        ));
        assert!(matches!(
            GameHost::start(test_config(MAX_SEATS + 1)).await,
            Err(HostError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_last_seat_survives_the_wire() {
        let last = Player::new(PlayerId(9), MAX_SEATS as u8, "last");
        let msg = Message::RequestPlayerProfile(last);
        let event = GameEvent::decode(msg.to_event(MAX_SEATS as u8, &Default::default()).encode()).unwrap();
        let Message::RequestPlayerProfile(seat) = Message::decode(&event, &Default::default()).unwrap() else {
            panic!("wrong message")
        };
        assert_eq!(seat.slot, MAX_SEATS as u8);
    }

    #[tokio::test]
    async fn test_admission_and_profile_broadcast() {
        let host = GameHost::start(test_config(2)).await.unwrap();
        let mut peer = Peer::new(host.local_addr()).await;

        peer.send(Message::RequestConnection, ORIGIN_NONE);
        let (origin, msg) = peer.expect(Header::RequestPlayerProfile).await;
        let Message::RequestPlayerProfile(seat) = msg else { panic!("wrong message") };
        assert_eq!(seat.slot, 1);
        assert_eq!(origin, 1);

        let me = Player::new(PlayerId(4242), seat.slot, "Vega");
        peer.send(Message::SubmittedPlayerProfile(me.clone()), 1);
        let (_, msg) = peer.expect(Header::SubmittedPlayerProfile).await;
        let Message::SubmittedPlayerProfile(echo) = msg else { panic!("wrong message") };
        assert_eq!(echo, me);
        assert_eq!(echo.name, "Vega");

        assert_eq!(host.peers().await[0].id, PlayerId(4242));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_neutral_identity_cannot_be_claimed() {
        let host = GameHost::start(test_config(2)).await.unwrap();
        let mut peer = Peer::new(host.local_addr()).await;
        peer.send(Message::RequestConnection, ORIGIN_NONE);
        peer.expect(Header::RequestPlayerProfile).await;

        peer.send(Message::SubmittedPlayerProfile(Player::new(DEFAULT_NEUTRAL_ID, 1, "x")), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_ne!(host.peers().await[0].id, DEFAULT_NEUTRAL_ID);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_from_peer_ends_its_session() {
        let host = GameHost::start(test_config(2)).await.unwrap();
        let mut peer = Peer::new(host.local_addr()).await;
        peer.send(Message::RequestConnection, ORIGIN_NONE);
        peer.expect(Header::RequestPlayerProfile).await;
        assert_eq!(host.peer_count().await, 1);

        peer.transport.send(host.local_addr(), Bytes::from_static(&[0xEE, 1]));
        let (origin, _) = peer.expect(Header::Disconnected).await;
        assert_eq!(origin, 1);
        for _ in 0..100 {
            if host.peer_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(host.peer_count().await, 0);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_once_everyone_is_ready() {
        let host = GameHost::start(test_config(2)).await.unwrap();
        let mut a = Peer::new(host.local_addr()).await;
        let mut b = Peer::new(host.local_addr()).await;
        for (peer, id) in [(&mut a, 1), (&mut b, 2)] {
            peer.send(Message::RequestConnection, ORIGIN_NONE);
            let (slot, _) = peer.expect(Header::RequestPlayerProfile).await;
            peer.send(Message::SubmittedPlayerProfile(Player::new(PlayerId(id), slot, "p")), slot);
        }

        a.send(Message::RequestGameStart, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(host.mode().await, DriverMode::Roaming);

        b.send(Message::RequestGameStart, 2);
        a.expect(Header::GameStart).await;
        b.expect(Header::GameStart).await;
        assert_eq!(host.mode().await, DriverMode::Locked);

        // Spawns are streamed as a star delta.
        a.expect(Header::StarStateChanged).await;
        let world = host.world().await;
        let owned = world.map().iter().filter(|s| s.owner() == PlayerId(1)).count();
        assert_eq!(owned, 1);
        drop(world);

        // Late joiners are turned away.
        let mut late = Peer::new(host.local_addr()).await;
        late.send(Message::RequestConnection, ORIGIN_NONE);
        late.expect(Header::ConnectionRefused).await;
        host.shutdown().await;
    }
}
