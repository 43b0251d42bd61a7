//! Client Communicator
//!
//! A peer's side of the session. [`GameClient::connect`] probes the host,
//! runs the join handshake and resolves once the host has echoed our own
//! profile back with an assigned slot. After that the receive task keeps
//! the peer roster and the local [`ClientWorld`] mirror current, answers
//! pings, and fans every gameplay event out to subscribers.
//!
//! Before the handshake settles, undecodable datagrams are treated as
//! noise. Once connected, anything the host should never send ends the
//! session with [`ClientState::Failed`]. A disconnect notice carrying our
//! own slot means the host has let us go ([`ClientState::Dropped`]).

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{broadcast, mpsc, watch, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ClientConfig;
use crate::game::fleet::CombatRules;
use crate::game::player::{Player, PlayerId, Roster};
use crate::game::starmap::{MapError, StarMap};
use crate::game::world::{BuildOrder, ClientWorld, DispatchOrder};
use crate::network::protocol::{GameEvent, Header, Message, ProtocolError, ORIGIN_NONE};
use crate::network::transport::{Datagram, Outbox, Transport, TransportError};

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientState {
    /// Join request sent, waiting for our profile to come back.
    Handshaking,
    /// Seated.
    Connected,
    /// Host refused the connection.
    Refused,
    /// Host was full.
    ServerFull,
    /// Host sent something invalid; session over.
    Failed,
    /// Host ended our session.
    Dropped,
}

/// Why a connection could not be established. Never retried here.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Address did not resolve or no route to it.
    #[error("host {host} is unreachable: {source}")]
    Unreachable {
        /// Address as given
        host: String,
        /// Underlying failure
        source: io::Error,
    },

    /// Host refused the connection.
    #[error("connection refused by host")]
    Refused,

    /// Host has no free seat.
    #[error("host is full")]
    ServerFull,

    /// No answer within the handshake window.
    #[error("no answer from host within {0:?}")]
    Timeout(Duration),

    /// Local socket setup failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Reasons a connected session ends.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed datagram or unknown header.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Star delta did not apply.
    #[error("bad star delta: {0}")]
    Delta(#[from] MapError),

    /// A message only peers send.
    #[error("unexpected {0:?} from host")]
    Unexpected(Header),
}

enum Flow {
    Continue,
    Stop,
}

struct ClientShared {
    host: SocketAddr,
    rules: CombatRules,
    outbox: Outbox,
    me: RwLock<Player>,
    roster: RwLock<Roster>,
    world: Mutex<ClientWorld>,
    state: watch::Sender<ClientState>,
    events: broadcast::Sender<GameEvent>,
}

impl ClientShared {
    fn send(&self, msg: &Message, origin: u8) {
        self.outbox
            .send(self.host, msg.to_event(origin, &self.rules).encode());
    }

    fn forward(&self, event: GameEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn handle(&self, data: Bytes) -> Result<Flow, SessionError> {
        let event = GameEvent::decode(data)?;
        let msg = Message::decode(&event, &self.rules)?;

        match msg {
            Message::Disconnected => {
                let mine = self.me.read().await.slot;
                if mine != 0 && event.origin == mine {
                    warn!(slot = mine, "Host ended our session");
                    self.forward(event);
                    self.state.send_replace(ClientState::Dropped);
                    return Ok(Flow::Stop);
                }
                if let Some(peer) = self.roster.write().await.remove_slot(event.origin) {
                    info!(player = %peer, "Peer left");
                }
                self.forward(event);
            }
            Message::ConnectionRefused | Message::ConnectionRefusedFull => {
                let state = if event.header == Header::ConnectionRefused {
                    ClientState::Refused
                } else {
                    ClientState::ServerFull
                };
                self.forward(event);
                let slot = self.me.read().await.slot;
                self.send(&Message::Disconnected, slot);
                self.state.send_replace(state);
                return Ok(Flow::Stop);
            }
            Message::RequestPlayerProfile(seat) => {
                let me = {
                    let mut me = self.me.write().await;
                    me.slot = seat.slot;
                    me.clone()
                };
                debug!(slot = me.slot, "Seat assigned");
                let slot = me.slot;
                self.send(&Message::SubmittedPlayerProfile(me), slot);
            }
            Message::SubmittedPlayerProfile(ref profile) => {
                let is_me = {
                    let mut me = self.me.write().await;
                    if *me == *profile {
                        me.slot = profile.slot;
                        me.name = profile.name.clone();
                        true
                    } else {
                        false
                    }
                };
                if is_me {
                    self.state.send_if_modified(|s| {
                        let settle = *s == ClientState::Handshaking;
                        if settle {
                            *s = ClientState::Connected;
                        }
                        settle
                    });
                } else {
                    let mut roster = self.roster.write().await;
                    // A stale seat holder whose disconnect we missed.
                    if roster.by_slot(profile.slot).is_some_and(|p| p.id != profile.id) {
                        roster.remove_slot(profile.slot);
                    }
                    roster.upsert(profile.clone());
                }
                self.forward(event);
            }
            Message::FleetDispatched { ref order, .. } => {
                self.world.lock().await.observe_dispatch(order);
                self.forward(event);
            }
            Message::StarStateChanged(ref delta) => {
                let applied = self.world.lock().await.apply_delta(delta)?;
                trace!(updated = applied.updated, inserted = applied.inserted, "Star delta");
                self.forward(event);
            }
            Message::GameStart => {
                info!("Game started");
                self.forward(event);
            }
            Message::Ping => {
                let slot = self.me.read().await.slot;
                self.send(&Message::Pong, slot);
            }
            other => return Err(SessionError::Unexpected(other.header())),
        }
        Ok(Flow::Continue)
    }
}

async fn run_receive(shared: Arc<ClientShared>, mut inbound: mpsc::Receiver<Datagram>) {
    while let Some((from, data)) = inbound.recv().await {
        if from != shared.host {
            debug!(%from, "Ignoring datagram from stranger");
            continue;
        }
        match shared.handle(data).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(e) if *shared.state.borrow() == ClientState::Handshaking => {
                debug!(error = %e, "Ignoring noise during handshake");
            }
            Err(e) => {
                error!(error = %e, "Protocol violation, leaving session");
                shared.state.send_replace(ClientState::Failed);
                break;
            }
        }
    }
}

/// Resolve `host` and check a route exists, within `limit`.
async fn probe(host: &str, limit: Duration) -> Result<SocketAddr, ConnectError> {
    let unreachable = |source| ConnectError::Unreachable { host: host.to_string(), source };
    let attempt = async {
        let addr = lookup_host(host)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses"))?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;
        Ok::<_, io::Error>(addr)
    };
    match timeout(limit, attempt).await {
        Ok(Ok(addr)) => Ok(addr),
        Ok(Err(e)) => Err(unreachable(e)),
        Err(_) => Err(unreachable(io::Error::new(io::ErrorKind::TimedOut, "probe timed out"))),
    }
}

// =============================================================================
// CLIENT HANDLE
// =============================================================================

/// A connected peer.
pub struct GameClient {
    shared: Arc<ClientShared>,
    transport: Transport,
    receive_task: JoinHandle<()>,
    next_seq: AtomicU32,
}

impl GameClient {
    /// Connect to `host` (`"addr:port"` or `"name:port"`).
    ///
    /// Fails with [`ConnectError::Unreachable`] before sending anything if
    /// the host cannot be resolved or routed to.
    #[instrument(skip(config), fields(name = %config.name))]
    pub async fn connect(host: &str, config: ClientConfig) -> Result<Self, ConnectError> {
        let host_addr = probe(host, config.reachability_timeout).await?;
        let (transport, inbound) = Transport::bind(config.bind_addr, config.transport.clone()).await?;

        let id = PlayerId::random(&mut rand::thread_rng(), config.neutral_id);
        let (state_tx, _) = watch::channel(ClientState::Handshaking);
        let (events, _) = broadcast::channel(config.listener_capacity.max(1));
        let shared = Arc::new(ClientShared {
            host: host_addr,
            rules: config.rules,
            outbox: transport.outbox(),
            me: RwLock::new(Player::new(id, 0, config.name.clone())),
            roster: RwLock::new(Roster::new(config.neutral_id)),
            world: Mutex::new(ClientWorld::new(StarMap::new(config.rules), config.ship_speed)),
            state: state_tx,
            events,
        });
        let receive_task = tokio::spawn(run_receive(shared.clone(), inbound));
        let client = Self { shared, transport, receive_task, next_seq: AtomicU32::new(1) };

        let mut state_rx = client.state_changes();
        client.shared.send(&Message::RequestConnection, ORIGIN_NONE);
        let limit = config.handshake_timeout;
        let settled = match timeout(limit, state_rx.wait_for(|s| *s != ClientState::Handshaking)).await {
            Ok(Ok(state)) => Some(*state),
            Ok(Err(_)) | Err(_) => None,
        };

        let err = match settled {
            Some(ClientState::Connected) => {
                let me = client.player().await;
                info!(host = %host_addr, player = %me, "Connected");
                return Ok(client);
            }
            Some(ClientState::Refused | ClientState::Dropped) => ConnectError::Refused,
            Some(ClientState::ServerFull) => ConnectError::ServerFull,
            Some(ClientState::Failed | ClientState::Handshaking) | None => ConnectError::Timeout(limit),
        };
        info!(host = %host_addr, error = %err, "Connection failed");
        client.close().await;
        Err(err)
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Host address.
    pub fn host_addr(&self) -> SocketAddr {
        self.shared.host
    }

    /// Current session state.
    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Watch session state changes.
    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Our own profile, with the host-assigned slot.
    pub async fn player(&self) -> Player {
        self.shared.me.read().await.clone()
    }

    /// Every other seated player, in id order.
    pub async fn peers(&self) -> Vec<Player> {
        self.shared.roster.read().await.iter().cloned().collect()
    }

    /// Receive every gameplay event the host sends.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.shared.events.subscribe()
    }

    /// Lock the local mirror.
    pub async fn world(&self) -> MutexGuard<'_, ClientWorld> {
        self.shared.world.lock().await
    }

    /// Tell the host we are ready.
    pub async fn request_game_start(&self) {
        self.send(&Message::RequestGameStart).await;
    }

    /// Ask the host to resend the whole map.
    pub async fn request_map(&self) {
        self.send(&Message::RequestMap).await;
    }

    /// Send ships. The fleet owner is set to us. Returns the sequence
    /// number the request carries.
    pub async fn dispatch(&self, mut order: DispatchOrder) -> u32 {
        order.fleet.owner = self.shared.me.read().await.id;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.send(&Message::FleetDispatched { order, seq: Some(seq) }).await;
        seq
    }

    /// Resend a dispatch with an already used sequence number. The host
    /// applies each number at most once.
    pub async fn redispatch(&self, mut order: DispatchOrder, seq: u32) {
        order.fleet.owner = self.shared.me.read().await.id;
        self.send(&Message::FleetDispatched { order, seq: Some(seq) }).await;
    }

    /// Change what a star builds.
    pub async fn send_build_order(&self, order: BuildOrder) {
        self.send(&Message::NewBuildOrder(order)).await;
    }

    async fn send(&self, msg: &Message) {
        let slot = self.shared.me.read().await.slot;
        self.shared.send(msg, slot);
    }

    /// Leave the session and close the socket.
    #[instrument(skip(self))]
    pub async fn disconnect(self) {
        self.close().await;
    }

    async fn close(self) {
        let slot = self.shared.me.read().await.slot;
        let already_left = matches!(
            self.state(),
            ClientState::Refused | ClientState::ServerFull | ClientState::Dropped
        );
        if slot != 0 && !already_left {
            self.shared.send(&Message::Disconnected, slot);
        }
        self.transport.stop().await;
        let _ = self.receive_task.await;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::TransportConfig;

    fn quick() -> ClientConfig {
        ClientConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            reachability_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_millis(300),
            transport: TransportConfig {
                drain_attempts: 2,
                drain_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Answer the join handshake the way a host would, seating the client
    /// at slot 1. Returns the client's address.
    async fn seat(fake: &UdpSocket) -> SocketAddr {
        let mut buf = [0u8; 256];
        let (_, from) = fake.recv_from(&mut buf).await.unwrap();
        let offer = Message::RequestPlayerProfile(Player::new(PlayerId(1), 1, ""));
        fake.send_to(&offer.to_event(1, &CombatRules::default()).encode(), from)
            .await
            .unwrap();
        // The submitted profile, echoed back as the host's rebroadcast.
        let (len, _) = fake.recv_from(&mut buf).await.unwrap();
        fake.send_to(&buf[..len], from).await.unwrap();
        from
    }

    async fn seated_client() -> (GameClient, UdpSocket, SocketAddr) {
        let fake = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = fake.local_addr().unwrap().to_string();
        let host = tokio::spawn(async move {
            let from = seat(&fake).await;
            (fake, from)
        });
        let client = GameClient::connect(&addr, quick()).await.unwrap();
        let (fake, from) = host.await.unwrap();
        (client, fake, from)
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_fast() {
        let err = GameClient::connect("not an address", quick()).await.err().unwrap();
        assert!(matches!(err, ConnectError::Unreachable { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_silent_host_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap().to_string();

        let err = GameClient::connect(&addr, quick()).await.err().unwrap();
        assert!(matches!(err, ConnectError::Timeout(_)));

        // The join request did go out.
        let mut buf = [0u8; 16];
        let (len, _) = silent.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[Header::RequestConnection as u8, ORIGIN_NONE]);
    }

    #[tokio::test]
    async fn test_refusal_is_reported() {
        let fake = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = fake.local_addr().unwrap().to_string();

        let answer = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let (_, from) = fake.recv_from(&mut buf).await.unwrap();
            // Noise first; ignored while handshaking.
            fake.send_to(&[0xFA], from).await.unwrap();
            fake.send_to(&[Header::ConnectionRefusedFull as u8, ORIGIN_NONE], from)
                .await
                .unwrap();
            // The client says goodbye before closing.
            let (len, _) = fake.recv_from(&mut buf).await.unwrap();
            buf[0..len].to_vec()
        });

        let err = GameClient::connect(&addr, quick()).await.err().unwrap();
        assert!(matches!(err, ConnectError::ServerFull));
        assert_eq!(answer.await.unwrap()[0], Header::Disconnected as u8);
    }

    #[tokio::test]
    async fn test_answers_ping_then_fails_on_unknown_header() {
        let (client, fake, from) = seated_client().await;
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.player().await.slot, 1);

        fake.send_to(&[Header::Ping as u8, ORIGIN_NONE], from).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, _) = timeout(Duration::from_secs(2), fake.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &[Header::Pong as u8, 1]);

        // Noise is fatal once seated.
        fake.send_to(&[0xEE, 1], from).await.unwrap();
        let mut changes = client.state_changes();
        timeout(Duration::from_secs(2), changes.wait_for(|s| *s == ClientState::Failed))
            .await
            .unwrap()
            .unwrap();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_notice_for_own_slot_ends_session() {
        let (client, fake, from) = seated_client().await;
        let mut events = client.subscribe();

        fake.send_to(&[Header::Disconnected as u8, 1], from).await.unwrap();
        let mut changes = client.state_changes();
        timeout(Duration::from_secs(2), changes.wait_for(|s| *s == ClientState::Dropped))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events.recv().await.unwrap().header, Header::Disconnected);

        // No goodbye back to a host that already let us go.
        client.disconnect().await;
        let mut buf = [0u8; 16];
        assert!(timeout(Duration::from_millis(200), fake.recv_from(&mut buf)).await.is_err());
    }
}
