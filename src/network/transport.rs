//! UDP Transport
//!
//! One socket, two tasks. The inbound task receives datagrams and hands
//! them to the owning communicator through a bounded queue. The outbound
//! task pops a FIFO of pending datagrams and sends them one at a time.
//! Callers never wait on the network: [`Outbox::send`] only enqueues.
//!
//! Stopping drains the outbound queue for a bounded window
//! (`drain_attempts` sleeps of `drain_interval`) before abandoning
//! whatever is still unsent.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::network::protocol::MAX_DATAGRAM;

/// A received datagram and its sender.
pub type Datagram = (SocketAddr, Bytes);

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Sleeps to wait for the outbound queue to empty on stop.
    pub drain_attempts: u32,
    /// Length of each drain sleep.
    pub drain_interval: Duration,
    /// Received datagrams buffered before the inbound task waits.
    pub inbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            drain_attempts: 10,
            drain_interval: Duration::from_millis(500),
            inbound_capacity: 256,
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not bind the socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying failure
        source: std::io::Error,
    },

    /// Socket bound but its address is unavailable.
    #[error("socket address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Cloneable send side of a [`Transport`].
#[derive(Debug, Clone)]
pub struct Outbox {
    queue: mpsc::UnboundedSender<Datagram>,
    pending: Arc<AtomicUsize>,
}

impl Outbox {
    /// Queue `data` for `to`. Never blocks; dropped if the transport stopped.
    pub fn send(&self, to: SocketAddr, data: Bytes) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.queue.send((to, data)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            debug!(%to, "Transport stopped, datagram dropped");
        }
    }

    /// Datagrams queued but not yet handed to the socket.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// A bound UDP socket with its inbound and outbound tasks.
pub struct Transport {
    local_addr: SocketAddr,
    outbox: Outbox,
    config: TransportConfig,
    shutdown_tx: watch::Sender<bool>,
    inbound_task: JoinHandle<()>,
    outbound_task: JoinHandle<()>,
}

impl Transport {
    /// Bind `addr` (port 0 picks a free port) and start both tasks.
    ///
    /// Returns the transport and the queue of received datagrams.
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<Datagram>), TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = socket.local_addr().map_err(TransportError::LocalAddr)?;
        let socket = Arc::new(socket);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let inbound_task = tokio::spawn(run_inbound(socket.clone(), inbound_tx, shutdown_rx.clone()));
        let outbound_task = tokio::spawn(run_outbound(
            socket,
            outbound_rx,
            pending.clone(),
            shutdown_rx,
        ));

        info!(%local_addr, "Transport running");
        let transport = Self {
            local_addr,
            outbox: Outbox { queue: outbound_tx, pending },
            config,
            shutdown_tx,
            inbound_task,
            outbound_task,
        };
        Ok((transport, inbound_rx))
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A send handle.
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Queue a datagram.
    pub fn send(&self, to: SocketAddr, data: Bytes) {
        self.outbox.send(to, data);
    }

    /// Drain the outbound queue within the configured window, then stop
    /// both tasks. Returns how many datagrams were abandoned unsent.
    pub async fn stop(self) -> usize {
        for _ in 0..self.config.drain_attempts {
            if self.outbox.pending() == 0 {
                break;
            }
            tokio::time::sleep(self.config.drain_interval).await;
        }
        let abandoned = self.outbox.pending();
        if abandoned > 0 {
            warn!(abandoned, "Abandoning unsent datagrams");
        }

        let _ = self.shutdown_tx.send(true);
        let _ = self.inbound_task.await;
        let _ = self.outbound_task.await;
        info!(local_addr = %self.local_addr, "Transport stopped");
        abandoned
    }
}

async fn run_inbound(
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    let data = Bytes::copy_from_slice(&buf[..len]);
                    #[cfg(feature = "debug-tracing")]
                    trace!(%from, bytes = %hex::encode(&data), "Datagram in");
                    if inbound.send((from, data)).await.is_err() {
                        break;
                    }
                }
                // ICMP errors from earlier sends surface here on some platforms.
                Err(e) => debug!(error = %e, "Receive failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
    trace!("Inbound task finished");
}

async fn run_outbound(
    socket: Arc<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<Datagram>,
    pending: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            item = queue.recv() => {
                let Some((to, data)) = item else { break };
                #[cfg(feature = "debug-tracing")]
                trace!(%to, bytes = %hex::encode(&data), "Datagram out");
                if let Err(e) = socket.send_to(&data, to).await {
                    warn!(%to, error = %e, "Send failed");
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            _ = shutdown.changed() => break,
        }
    }
    trace!("Outbound task finished");
}

// =============================================================================
// TESTS
// =============================================================================
