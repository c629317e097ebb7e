//! # Message Format
//!
//! The relay has no framing: every read hands over whatever bytes were
//! available, and the server forwards them to the other peers prefixed with a
//! human-readable sender tag:
//!
//! ```text
//! [Client <id>]: <raw bytes as read>
//! ```

use std::fmt;

/// Line sent to a connection that could not be registered.
pub const REJECTION_NOTICE: &[u8] = b"[Server]: server full, connection rejected\n";

/// Identity assigned to a connection by the server when it is accepted.
///
/// Identities come from a per-server monotonic counter, so two live
/// connections on the same server never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefix `payload` with the sender tag.
///
/// The payload is copied byte for byte; it does not need to be valid UTF-8.
///
/// # Example
/// ```
/// use chat_relay::common::messages::{tag_payload, ClientId};
///
/// let tagged = tag_payload(ClientId(7), b"hello");
/// assert_eq!(tagged, b"[Client 7]: hello");
/// ```
pub fn tag_payload(sender: ClientId, payload: &[u8]) -> Vec<u8> {
    let prefix = format!("[Client {}]: ", sender);
    let mut tagged = Vec::with_capacity(prefix.len() + payload.len());
    tagged.extend_from_slice(prefix.as_bytes());
    tagged.extend_from_slice(payload);
    tagged
}

/// Render bytes for a log line. Invalid UTF-8 is replaced, trailing newlines dropped.
pub fn preview(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
