use crate::broadcast::Delivery;
use crate::error::RelaysError;
use crate::metrics::{counters, gauges};
use crate::registry::{ConnId, SubscriberHandle};
use crate::server::ServerState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Duration};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Deliveries a session will queue before the broadcaster waits on it.
const DELIVERY_QUEUE: usize = 64;

/// Lifecycle of one subscriber session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// WebSocket handshake in progress.
    Connecting,
    /// Registered and receiving broadcasts.
    Registered,
    /// Deregistered; the connection is discarded.
    Closed,
}

/// Removes the session from the registry on every exit path, including
/// errors and panics inside the message loop.
struct Registration {
    state: Arc<ServerState>,
    id: ConnId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(handle) = self.state.registry.take(self.id) else {
            return;
        };
        gauges::dec_subscribers_active();
        debug!(
            conn = self.id,
            peer = %handle.peer,
            connected_for_ms = u64::try_from(handle.connected_at.elapsed().as_millis())
                .unwrap_or(u64::MAX),
            state = ?SessionState::Closed,
            "subscriber deregistered"
        );
    }
}

/// Serve one subscriber connection from handshake to close.
///
/// # Errors
///
/// Returns the transport error that ended the session, or
/// [`RelaysError::AtCapacity`] when the subscriber limit is reached. The
/// caller only logs these; they never reach the ingress.
pub async fn handle_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), RelaysError> {
    let id = state.registry.allocate_id();
    debug!(conn = id, %peer, state = ?SessionState::Connecting, "subscriber connecting");

    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_message_size),
        max_frame_size: Some(state.config.max_message_size),
        ..WebSocketConfig::default()
    };
    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let _slot = match state.subscriber_slots.as_ref() {
        Some(slots) => match slots.try_acquire() {
            Ok(permit) => Some(permit),
            Err(_) => {
                let limit = state.config.max_subscribers.unwrap_or_default();
                counters::subscribers_rejected_total();
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Again,
                        reason: "subscriber limit reached".into(),
                    })))
                    .await;
                return Err(RelaysError::AtCapacity(limit));
            }
        },
        None => None,
    };

    let (deliver_tx, mut deliver_rx) = mpsc::channel::<Delivery>(DELIVERY_QUEUE);
    let handle = SubscriberHandle {
        id,
        peer,
        connected_at: Instant::now(),
        tx: deliver_tx,
    };

    let _registration = Registration {
        state: state.clone(),
        id,
    };
    if state.registry.add(handle) {
        gauges::inc_subscribers_active();
    }
    debug!(conn = id, %peer, state = ?SessionState::Registered, "subscriber registered");

    run_session_loop(
        &mut ws_tx,
        &mut ws_rx,
        &mut deliver_rx,
        &mut shutdown,
        Duration::from_secs(state.config.ping_interval),
        id,
    )
    .await
}

/// Drive the receive/deliver/keepalive select loop of a registered session.
async fn run_session_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    deliver_rx: &mut mpsc::Receiver<Delivery>,
    shutdown: &mut watch::Receiver<()>,
    ping_every: Duration,
    id: ConnId,
) -> Result<(), RelaysError> {
    let mut ping_interval = interval_at(tokio::time::Instant::now() + ping_every, ping_every);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    // Subscriber traffic is not part of the broadcast protocol.
                    Some(Ok(Message::Text(text))) => {
                        debug!(conn = id, len = text.len(), "discarding subscriber message");
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(conn = id, len = data.len(), "discarding subscriber message");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!(conn = id, "failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(conn = id, ?frame, "subscriber closed connection");
                        return Ok(());
                    }
                    None => return Ok(()),
                    Some(Err(e)) => return Err(RelaysError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(delivery) = deliver_rx.recv() => {
                match ws_tx.send(Message::Text(delivery.payload.to_string())).await {
                    Ok(()) => {
                        let _ = delivery.ack.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = delivery.ack.send(Err(e.to_string()));
                        return Err(RelaysError::WebSocket(e));
                    }
                }
            }
            _ = ping_interval.tick() => {
                if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                    debug!(conn = id, "failed to send ping: {}", e);
                }
            }
            _ = shutdown.changed() => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn test_state() -> Arc<ServerState> {
        let config = ServerConfig {
            ingress_addr: "127.0.0.1:0".parse().unwrap(),
            subscriber_addr: "127.0.0.1:0".parse().unwrap(),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            max_subscribers: None,
            max_message_size: 1024,
            ping_interval: 30,
        };
        Arc::new(ServerState::new(config))
    }

    #[test]
    fn registration_drop_removes_once() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(1);
        let id = state.registry.allocate_id();
        state.registry.add(SubscriberHandle {
            id,
            peer: "127.0.0.1:1".parse().unwrap(),
            connected_at: Instant::now(),
            tx,
        });

        {
            let _registration = Registration {
                state: state.clone(),
                id,
            };
        }
        assert!(!state.registry.contains(id));

        // A second deregistration for the same id is a no-op.
        drop(Registration {
            state: state.clone(),
            id,
        });
        assert!(state.registry.is_empty());
    }

    #[test]
    fn registration_drop_runs_on_panic() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(1);
        let id = state.registry.allocate_id();
        state.registry.add(SubscriberHandle {
            id,
            peer: "127.0.0.1:1".parse().unwrap(),
            connected_at: Instant::now(),
            tx,
        });

        let cloned = state.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _registration = Registration { state: cloned, id };
            panic!("handler failure");
        }));
        assert!(result.is_err());
        assert!(!state.registry.contains(id));
    }
}
