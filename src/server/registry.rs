//! # Connection Registry
//!
//! Bookkeeping of the connections that are currently able to receive
//! broadcasts. The registry is the only state shared between sessions.
//!
//! ## Locking
//!
//! One mutex covers the whole set. Every operation holds it only long enough
//! to scan or copy the map and never across an `.await`, so a slow peer can
//! never stall registration of other connections. Broadcasts work on a
//! [`snapshot`](ConnectionRegistry::snapshot) taken under the lock and
//! written to after it is released.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::common::messages::ClientId;
use crate::error::{RelayError, Result};

/// Write side of a peer's transport.
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A registered connection as seen by other sessions.
///
/// The owning session keeps the read half of the transport; the write half
/// lives here behind an async mutex so that two sessions broadcasting to the
/// same peer at once never interleave their bytes.
pub struct PeerHandle {
    id: ClientId,
    addr: SocketAddr,
    writer: tokio::sync::Mutex<PeerWriter>,
}

impl PeerHandle {
    pub fn new<W>(id: ClientId, addr: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            addr,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Write all of `bytes` to the peer and flush.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Shut down the write half. Later writes fail.
    pub async fn close(&self) -> std::io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

/// Set of live connections, keyed by identity.
///
/// Implementations must make `add`, `remove` and `snapshot` mutually
/// exclusive so that a snapshot never observes a half-applied update.
pub trait ConnectionRegistry: Send + Sync {
    /// Register a peer. Adding an identity that is already present has no effect.
    ///
    /// # Errors
    /// [`RelayError::CapacityExceeded`] if the registry is bounded and full.
    fn add(&self, peer: Arc<PeerHandle>) -> Result<()>;

    /// Deregister a peer. Removing an absent identity is a no-op.
    fn remove(&self, id: ClientId) -> Option<Arc<PeerHandle>>;

    /// Copy of every registered peer except `excluding`, ordered by identity.
    fn snapshot(&self, excluding: ClientId) -> Vec<Arc<PeerHandle>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Growable registry with an optional capacity bound.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    peers: Mutex<HashMap<ClientId, Arc<PeerHandle>>>,
    capacity: Option<usize>,
}

impl InMemoryRegistry {
    /// Unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that refuses registrations beyond `capacity` peers.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    pub fn with_capacity_limit(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::new(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    // The map holds no invariants a panicking holder could break halfway.
    fn peers(&self) -> MutexGuard<'_, HashMap<ClientId, Arc<PeerHandle>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionRegistry for InMemoryRegistry {
    fn add(&self, peer: Arc<PeerHandle>) -> Result<()> {
        let mut peers = self.peers();

        if peers.contains_key(&peer.id()) {
            return Ok(());
        }
        if let Some(capacity) = self.capacity {
            if peers.len() >= capacity {
                return Err(RelayError::CapacityExceeded { capacity });
            }
        }

        peers.insert(peer.id(), peer);
        Ok(())
    }

    fn remove(&self, id: ClientId) -> Option<Arc<PeerHandle>> {
        self.peers().remove(&id)
    }

    fn snapshot(&self, excluding: ClientId) -> Vec<Arc<PeerHandle>> {
        let mut snapshot: Vec<_> = self
            .peers()
            .values()
            .filter(|peer| peer.id() != excluding)
            .cloned()
            .collect();
        snapshot.sort_by_key(|peer| peer.id());
        snapshot
    }

    fn len(&self) -> usize {
        self.peers().len()
    }
}
