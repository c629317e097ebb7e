//! # Error Types
//!
//! Typed errors for the relay library. Binaries and tests work with
//! `anyhow::Result` and convert these with `?`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The registry is bounded and already holds `capacity` connections.
    #[error("Registry full: {capacity} active connections")]
    CapacityExceeded { capacity: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
