//! Relay client: subscribes to the relay server and forwards every broadcast
//! to a fixed downstream HTTP sink.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Exponential backoff with jitter for reconnection.
pub mod backoff;
/// CLI parsing and layered configuration.
pub mod config;
/// HTTP POST to the downstream sink.
pub mod forwarder;
/// WebSocket subscription and forwarding loop.
pub mod pump;
