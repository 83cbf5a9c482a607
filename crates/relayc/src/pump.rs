use crate::backoff::ExponentialBackoff;
use crate::config::{ClientConfig, OnError};
use crate::forwarder::{ForwardError, Forwarder};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

/// Why the subscription pump stopped.
#[derive(Error, Debug)]
pub enum PumpError {
    /// The subscription was lost; retried when reconnect is enabled.
    #[error("subscription lost: {0}")]
    Transient(anyhow::Error),
    /// A forward failed under the `exit` policy.
    #[error("forward failed: {0}")]
    Fatal(#[from] ForwardError),
}

impl PumpError {
    fn lost(reason: impl Into<anyhow::Error>) -> Self {
        Self::Transient(reason.into())
    }

    /// Whether a reconnect could recover from this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Connection status of the subscriber WebSocket link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Not connected to the relay server.
    Disconnected,
    /// WebSocket handshake in progress.
    Connecting,
    /// Subscribed and receiving broadcasts.
    Connected,
}

/// Top-level pump: subscribe, forward every message, and reconnect with
/// backoff when `reconnect.enabled` is set.
///
/// Never returns while the subscription is healthy; the returned error is the
/// reason it ended for good.
pub async fn run_pump(
    config: Arc<ClientConfig>,
    forwarder: Forwarder,
    status_tx: watch::Sender<ConnStatus>,
) -> PumpError {
    let mut backoff = ExponentialBackoff::from_config(&config.reconnect);

    loop {
        status_tx.send_replace(ConnStatus::Connecting);

        let err = connect_and_forward(&config, &forwarder, &status_tx).await;
        let was_connected = *status_tx.borrow() == ConnStatus::Connected;
        status_tx.send_replace(ConnStatus::Disconnected);

        if !err.is_transient() {
            error!(error = %err, "fatal pump error, not retrying");
            return err;
        }
        if !config.reconnect.enabled {
            error!(error = %err, "subscription lost");
            return err;
        }

        warn!(error = %err, "subscription lost");
        if was_connected {
            backoff.reset();
        }

        let delay = backoff.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::time::sleep(delay).await;
    }
}

/// One subscription: connect, then forward each payload in arrival order,
/// awaiting every forward before the next receive.
async fn connect_and_forward(
    config: &ClientConfig,
    forwarder: &Forwarder,
    status_tx: &watch::Sender<ConnStatus>,
) -> PumpError {
    let ws = match tokio_tungstenite::connect_async(config.server.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => return PumpError::lost(e),
    };

    status_tx.send_replace(ConnStatus::Connected);
    info!(server = %config.server, "subscribed to relay server");

    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        let msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return PumpError::lost(e),
            None => return PumpError::lost(anyhow::anyhow!("connection closed")),
        };

        let payload = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    warn!(bytes = e.as_bytes().len(), "dropping non-UTF-8 binary message");
                    continue;
                }
            },
            Message::Ping(data) => {
                if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                    return PumpError::lost(e);
                }
                continue;
            }
            Message::Close(frame) => {
                debug!(?frame, "server sent close");
                return PumpError::lost(close_reason(frame));
            }
            Message::Pong(_) | Message::Frame(_) => continue,
        };

        info!(bytes = payload.len(), "received message from relay server");

        match forwarder.forward(&payload).await {
            Ok(status) => info!(status = %status, "forwarded message downstream"),
            Err(e) => match config.downstream.on_error {
                OnError::Exit => return PumpError::Fatal(e),
                OnError::Skip => warn!(error = %e, "forward failed, skipping message"),
            },
        }
    }
}

fn close_reason(frame: Option<tungstenite::protocol::CloseFrame<'_>>) -> anyhow::Error {
    match frame {
        Some(frame) => anyhow::anyhow!("server closed connection ({}: {})", frame.code, frame.reason),
        None => anyhow::anyhow!("server closed connection"),
    }
}
