use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum RelaysError {
    /// WebSocket handshake or transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The envelope could not be serialized for broadcast.
    #[error("envelope error: {0}")]
    Envelope(#[from] relay_common::EnvelopeError),
    /// The subscriber limit was reached and the connection was turned away.
    #[error("subscriber limit reached ({0})")]
    AtCapacity(usize),
}
