//! Network Layer
//!
//! UDP session protocol between one host and its peers.
//! Delivery is unreliable: the star sync resends full current values, so
//! loss and reordering only delay convergence.

pub mod protocol;
pub mod transport;
pub mod client;
pub mod host;
pub mod tick;

pub use protocol::{GameEvent, Header, Message, ProtocolError};
pub use transport::{Outbox, Transport, TransportConfig, TransportError};
pub use client::{ClientState, ConnectError, GameClient, SessionError};
pub use host::{GameHost, HostError, PeerEntry};
pub use tick::{DriverMode, TickSummary};
