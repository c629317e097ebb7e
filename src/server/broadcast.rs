//! # Broadcast Coordinator
//!
//! Fans a message from one connection out to every other registered one.
//!
//! Delivery is best effort: a write that fails is logged and skipped, the
//! remaining peers still get the message, and the sender is never told about
//! individual failures. There is no retry and no acknowledgement.

use log::{debug, warn};
use std::sync::Arc;

use crate::common::messages::{tag_payload, ClientId};
use crate::server::registry::ConnectionRegistry;

/// Outcome of one broadcast, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct BroadcastCoordinator {
    registry: Arc<dyn ConnectionRegistry>,
}

impl BroadcastCoordinator {
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Tag `payload` with the sender's identity and write it to every other peer.
    ///
    /// The registry snapshot is taken first and the registry lock is released
    /// before any write, so a peer that is slow to drain only delays this
    /// sender. Writes to one peer are serialized by that peer's own lock.
    pub async fn send(&self, sender: ClientId, payload: &[u8]) -> BroadcastReport {
        let recipients = self.registry.snapshot(sender);
        let message = tag_payload(sender, payload);
        let mut report = BroadcastReport::default();

        for peer in recipients {
            match peer.write(&message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "⚠️  Failed to deliver message from Client {} to Client {} ({}): {}",
                        sender,
                        peer.id(),
                        peer.addr(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            "📤 Broadcast from Client {}: {} delivered, {} failed",
            sender, report.delivered, report.failed
        );
        report
    }
}
