//! Module Exports
//!
//! This file exports the key modules used by the TCP command server.
//!
//! # Modules
//! - `protocol`: Line framing, command decoding and response encoding.
//! - `server`: Accept loop and per-connection workers.
//! - `session`: Registry of connected clients.

pub mod protocol;
pub mod server;
pub mod session;
