//! # Connection Session
//!
//! One session runs per accepted connection, in its own task:
//!
//! ```text
//! Connecting --register--> Active --EOF / read error / shutdown--> Closing --> Closed
//!      |                                                                         ^
//!      +--------------------------- registry full -------------------------------+
//! ```
//!
//! While `Active` the session owns the read half of the transport and blocks
//! on it; every non-empty read is handed to the [`BroadcastCoordinator`].
//! Errors on this connection end this session only.

use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::common::messages::{preview, ClientId, REJECTION_NOTICE};
use crate::server::broadcast::BroadcastCoordinator;
use crate::server::registry::{ConnectionRegistry, PeerHandle};

/// Longest a closing session waits for its peer's write lock.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side of the connection.
    PeerClosed,
    /// Reading from the peer failed.
    ReadError,
    /// The server is shutting down.
    Shutdown,
    /// The registry was full; the connection was never activated.
    Rejected,
}

/// Server-wide collaborators every session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<dyn ConnectionRegistry>,
    pub shutdown: watch::Receiver<bool>,
    pub read_buffer_size: usize,
}

pub struct ConnectionSession {
    peer: Arc<PeerHandle>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    registry: Arc<dyn ConnectionRegistry>,
    coordinator: BroadcastCoordinator,
    shutdown: watch::Receiver<bool>,
    read_buffer_size: usize,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new<R, W>(id: ClientId, addr: SocketAddr, reader: R, writer: W, ctx: SessionContext) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer: Arc::new(PeerHandle::new(id, addr, writer)),
            reader: Box::new(reader),
            coordinator: BroadcastCoordinator::new(Arc::clone(&ctx.registry)),
            registry: ctx.registry,
            shutdown: ctx.shutdown,
            read_buffer_size: ctx.read_buffer_size.max(1),
            state: SessionState::Connecting,
        }
    }

    /// Split an accepted TCP stream into a session.
    pub fn from_tcp(id: ClientId, stream: TcpStream, ctx: SessionContext) -> std::io::Result<Self> {
        let addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(id, addr, reader, writer, ctx))
    }

    pub fn id(&self) -> ClientId {
        self.peer.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to `Closed`.
    pub async fn run(mut self) -> SessionEnd {
        if !self.register().await {
            return SessionEnd::Rejected;
        }

        let end = self.read_loop().await;
        self.close().await;
        end
    }

    async fn register(&mut self) -> bool {
        let id = self.peer.id();
        let addr = self.peer.addr();

        match self.registry.add(Arc::clone(&self.peer)) {
            Ok(()) => {
                info!("🔗 Client {} connected with ID: {}", addr, id);
                self.transition(SessionState::Active);
                true
            }
            Err(e) => {
                warn!("🚫 Rejecting Client {} (ID: {}): {}", addr, id, e);
                if let Err(e) = self.peer.write(REJECTION_NOTICE).await {
                    debug!("Could not notify rejected Client {}: {}", id, e);
                }
                self.close_peer().await;
                self.transition(SessionState::Closed);
                false
            }
        }
    }

    async fn read_loop(&mut self) -> SessionEnd {
        let id = self.peer.id();
        let mut buffer = vec![0u8; self.read_buffer_size];

        loop {
            let read = tokio::select! {
                result = self.reader.read(&mut buffer) => Some(result),
                _ = wait_for_shutdown(&mut self.shutdown) => None,
            };

            match read {
                None => {
                    debug!("🛑 Client {} stopping for server shutdown", id);
                    return SessionEnd::Shutdown;
                }
                Some(Ok(0)) => return SessionEnd::PeerClosed,
                Some(Ok(n)) => {
                    let payload = &buffer[..n];
                    info!("💬 Client {} sent: {}", id, preview(payload));

                    // A peer that stops reading can block this forever
                    let delivered = tokio::select! {
                        _ = self.coordinator.send(id, payload) => true,
                        _ = wait_for_shutdown(&mut self.shutdown) => false,
                    };
                    if !delivered {
                        debug!("🛑 Client {} abandoning broadcast for server shutdown", id);
                        return SessionEnd::Shutdown;
                    }
                }
                Some(Err(e)) => {
                    warn!("⚠️  Read error from Client {}: {}", id, e);
                    return SessionEnd::ReadError;
                }
            }
        }
    }

    async fn close(&mut self) {
        self.transition(SessionState::Closing);

        self.registry.remove(self.peer.id());
        self.close_peer().await;

        info!(
            "🔌 Client {} (ID: {}) disconnected",
            self.peer.addr(),
            self.peer.id()
        );
        self.transition(SessionState::Closed);
    }

    /// Shut down the write half. A stalled broadcast may hold the peer's
    /// write lock, so the wait is bounded; the half is then released when
    /// the last handle drops.
    async fn close_peer(&mut self) {
        let id = self.peer.id();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.peer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Closing Client {} transport: {}", id, e),
            Err(_) => debug!("Timed out closing Client {} transport", id),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Client {}: {:?} -> {:?}", self.peer.id(), self.state, next);
        self.state = next;
    }
}

/// Resolves once shutdown has been signalled. If the signal can no longer be
/// sent, the session lives as long as its transport.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
