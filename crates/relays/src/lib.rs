//! Relay server: broadcasts every HTTP ingress request to all connected
//! WebSocket subscribers.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Envelope fan-out to registered subscribers.
pub mod broadcast;
/// CLI argument parsing and server configuration.
pub mod config;
/// Error types for relay server operations.
pub mod error;
/// HTTP ingress endpoint.
pub mod ingress;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Set of currently open subscriber connections.
pub mod registry;
/// Per-subscriber WebSocket session.
pub mod session;
/// Listener loops and shared server state.
pub mod server;

pub use server::{run_with_shutdown, ServerState};
