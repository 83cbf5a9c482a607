#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use relays::config::ServerConfig;
use relays::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        ingress_addr: "127.0.0.1:0".parse().unwrap(),
        subscriber_addr: "127.0.0.1:0".parse().unwrap(),
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_subscribers: None,
        max_message_size: 1024 * 1024,
        ping_interval: 30,
    }
}

pub struct TestServer {
    pub ingress: SocketAddr,
    pub subscribers: SocketAddr,
    pub state: Arc<ServerState>,
    pub shutdown_tx: watch::Sender<()>,
    pub task: tokio::task::JoinHandle<Result<(), relays::error::RelaysError>>,
}

impl TestServer {
    pub fn ingress_url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.ingress, path_and_query)
    }

    /// Wait until the registry holds exactly `n` subscribers.
    pub async fn wait_for_subscribers(&self, n: usize) {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.registry.len() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "expected {n} subscribers, registry has {}",
            self.state.registry.len()
        );
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(test_config()).await
}

pub async fn start_server_with(config: ServerConfig) -> TestServer {
    let ingress_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let subscriber_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ingress = ingress_listener.local_addr().unwrap();
    let subscribers = subscriber_listener.local_addr().unwrap();

    let state = Arc::new(ServerState::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let task = tokio::spawn(relays::run_with_shutdown(
        ingress_listener,
        subscriber_listener,
        state.clone(),
        shutdown_rx,
    ));

    TestServer {
        ingress,
        subscribers,
        state,
        shutdown_tx,
        task,
    }
}

pub struct TestSubscriber {
    pub ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    pub ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestSubscriber {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    /// Connect without client-side message or frame size limits.
    pub async fn connect_unbounded(addr: &SocketAddr) -> Self {
        let url = format!("ws://{addr}");
        let config = WebSocketConfig {
            max_message_size: None,
            max_frame_size: None,
            ..WebSocketConfig::default()
        };
        let (ws, _) = tokio_tungstenite::connect_async_with_config(url, Some(config), false)
            .await
            .unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    /// Next text message, skipping control frames.
    pub async fn recv_text(&mut self) -> String {
        self.recv_text_timeout(Duration::from_secs(5))
            .await
            .expect("timeout waiting for broadcast")
    }

    pub async fn recv_text_timeout(&mut self, timeout: Duration) -> Option<String> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                match self.ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => return Some(text),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(other)) => panic!("expected text frame, got {other:?}"),
                    Some(Err(_)) | None => return None,
                }
            }
        })
        .await;
        result.ok().flatten()
    }

    /// Next close frame, or `None` if the stream ended without one.
    pub async fn recv_close(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = self.ws_rx.next().await {
                match msg {
                    Ok(msg @ Message::Close(_)) => return Some(msg),
                    Ok(_) => {}
                    Err(_) => return None,
                }
            }
            None
        })
        .await
        .expect("timeout waiting for close")
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws_tx.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
    }
}
