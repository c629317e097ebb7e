use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::messages::ClientId;

/// Hands out connection identities from a single shared counter.
///
/// One allocator belongs to one server instance; identities start at 1 and
/// never repeat for the lifetime of that instance, however many connections
/// arrive at the same instant.
#[derive(Debug)]
pub struct IdentityAllocator {
    next: AtomicU64,
}

impl IdentityAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ClientId {
        ClientId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
