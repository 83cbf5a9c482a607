//! Types shared by the relay server and the forwarding client.
//!
//! - The relayed event record and its JSON codec ([`envelope`])
//! - Default ports, paths and fixed protocol strings ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod types;

pub use envelope::{Envelope, EnvelopeError};
