//! # chat-relay
//!
//! A multi-client text relay over TCP. Every chunk a client sends is tagged
//! with the sender's identity and written to every other connected client.

pub mod client;
pub mod common;
pub mod error;
pub mod server;

pub use client::ChatClient;
pub use error::RelayError;
pub use server::ChatServer;
