//! # Common Components
//!
//! Shared utilities and data structures used by both client and server components.
//!
//! ## Modules
//!
//! - [`messages`]: Client identities and the broadcast payload format
//! - [`config`]: Configuration parsing utilities
//! - [`logging`]: Logger initialisation for both binaries' roles

pub mod config;
pub mod logging;
pub mod messages;
