//! # Client Components
//!
//! The interactive client: a receiver task that prints broadcasts from the
//! server and a send loop that forwards local input lines.

pub mod client;

pub use client::{receive_messages, ChatClient, ClientExit};
