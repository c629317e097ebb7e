//! # Configuration Utilities
//!
//! TOML configuration for the relay server. Every field has a default, so the
//! server also runs without a configuration file.
//!
//! # Example TOML
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:0"
//! max_clients = 10
//! read_buffer_size = 1024
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::RelayError;

/// Size of the buffer each read fills at most.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/server.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerInfo,
}

/// Listener and registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Address to bind. Port 0 asks the OS for an ephemeral port.
    #[serde(default = "default_address")]
    pub address: String,
    /// Maximum number of simultaneously registered connections.
    /// `None` means the registry grows without bound.
    #[serde(default)]
    pub max_clients: Option<usize>,
    /// Upper bound on the bytes returned by a single read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_address() -> String {
    "0.0.0.0:0".to_string()
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_clients: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load and validate a server configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let config: ServerConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would leave the server unable to relay anything.
    pub fn validate(&self) -> std::result::Result<(), RelayError> {
        if self.server.max_clients == Some(0) {
            return Err(RelayError::InvalidConfig(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if self.server.read_buffer_size == 0 {
            return Err(RelayError::InvalidConfig(
                "read_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
