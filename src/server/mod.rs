//! # Server Components
//!
//! Dependency order, leaves first:
//!
//! - [`registry`]: the shared set of live connections
//! - [`broadcast`]: fan-out of one message to every other registered peer
//! - [`session`]: per-connection read loop and registry membership
//! - [`server`]: the listener that starts one session per accepted connection
//!
//! [`identity`] hands out the per-connection identities used in sender tags.

pub mod broadcast;
pub mod identity;
pub mod registry;
pub mod server;
pub mod session;

pub use broadcast::{BroadcastCoordinator, BroadcastReport};
pub use registry::{ConnectionRegistry, InMemoryRegistry, PeerHandle};
pub use server::ChatServer;
pub use session::{ConnectionSession, SessionEnd, SessionState};
