//! # Relay Server - Listener
//!
//! Accepts TCP connections and runs one [`ConnectionSession`] task per
//! connection. All server state (registry, identity counter, shutdown signal)
//! belongs to the [`ChatServer`] instance, so several servers can run side by
//! side in one process.
//!
//! ## Shutdown
//!
//! [`ChatServer::shutdown`] stops the accept loop and signals every session.
//! Sessions leave the registry as they observe the signal, and
//! [`ChatServer::serve`] returns once all of them have finished.

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

use crate::common::config::ServerConfig;
use crate::common::messages::ClientId;
use crate::server::identity::IdentityAllocator;
use crate::server::registry::{ConnectionRegistry, InMemoryRegistry};
use crate::server::session::{ConnectionSession, SessionContext, SessionEnd};

/// First delay after a failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

type SessionResult = std::result::Result<(ClientId, SessionEnd), JoinError>;

enum ListenerEvent {
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    SessionFinished(SessionResult),
    Shutdown,
}

/// The relay server. Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<dyn ConnectionRegistry>,
    identities: Arc<IdentityAllocator>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ChatServer {
    /// Create a server with an in-memory registry sized from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::with_capacity_limit(
            config.server.max_clients,
        ));
        Self::with_registry(config, registry)
    }

    /// Create a server around a caller-supplied registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<dyn ConnectionRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry,
            identities: Arc::new(IdentityAllocator::new()),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Bind the configured address and log the port the OS assigned.
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = &self.config.server.address;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| anyhow!("Failed to bind to {}: {}", address, e))?;

        let local = listener.local_addr()?;
        info!("📡 Server listening on port {}", local.port());
        Ok(listener)
    }

    /// Bind and serve until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections on `listener` until shutdown, then wait for every session.
    pub async fn serve(&self, listener: TcpListener) {
        let mut sessions: JoinSet<(ClientId, SessionEnd)> = JoinSet::new();
        let mut shutdown = self.shutdown.subscribe();
        let mut accept_failures = 0u32;

        loop {
            let event = tokio::select! {
                accepted = listener.accept() => ListenerEvent::Accepted(accepted),
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    ListenerEvent::SessionFinished(finished)
                }
                _ = shutdown.wait_for(|stop| *stop) => ListenerEvent::Shutdown,
            };

            match event {
                ListenerEvent::Accepted(Ok((stream, addr))) => {
                    accept_failures = 0;
                    self.spawn_session(&mut sessions, stream, addr);
                }
                ListenerEvent::Accepted(Err(e)) => {
                    accept_failures = accept_failures.saturating_add(1);
                    let delay = accept_backoff(accept_failures);
                    error!("❌ Accept error: {} (retrying in {:?})", e, delay);
                    // Errors such as EMFILE persist; give sessions time to release descriptors
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }
                ListenerEvent::SessionFinished(finished) => log_session_end(finished),
                ListenerEvent::Shutdown => break,
            }
        }

        drop(listener);
        info!(
            "🛑 Listener stopped, waiting for {} session(s) to close",
            sessions.len()
        );
        while let Some(finished) = sessions.join_next().await {
            log_session_end(finished);
        }
        info!("👋 Server shut down");
    }

    /// Ask the accept loop and all sessions to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn spawn_session(
        &self,
        sessions: &mut JoinSet<(ClientId, SessionEnd)>,
        stream: TcpStream,
        addr: SocketAddr,
    ) {
        let id = self.identities.next_id();
        let ctx = SessionContext {
            registry: Arc::clone(&self.registry),
            shutdown: self.shutdown.subscribe(),
            read_buffer_size: self.config.server.read_buffer_size,
        };

        match ConnectionSession::from_tcp(id, stream, ctx) {
            Ok(session) => {
                sessions.spawn(async move { (id, session.run().await) });
            }
            Err(e) => warn!("⚠️  Could not start session for {}: {}", addr, e),
        }
    }
}

fn log_session_end(finished: SessionResult) {
    match finished {
        Ok((id, end)) => debug!("Session for Client {} ended: {:?}", id, end),
        Err(e) => error!("❌ Session task failed: {}", e),
    }
}

fn accept_backoff(consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(5);
    (ACCEPT_BACKOFF_BASE * 2u32.pow(exponent)).min(ACCEPT_BACKOFF_MAX)
}
