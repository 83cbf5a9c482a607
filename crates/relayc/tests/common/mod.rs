#![allow(dead_code)]

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use relayc::config::{BodyMode, ClientConfig, OnError};
use relayc::forwarder::Forwarder;
use relayc::pump::{run_pump, ConnStatus, PumpError};
use relays::config::ServerConfig;
use relays::ServerState;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

pub const SCENARIO: &str = r#"{"method":"GET","path":"/x","headers":{},"query":{},"body":""}"#;

pub struct TestRelay {
    pub ingress: SocketAddr,
    pub subscribers: SocketAddr,
    pub state: Arc<ServerState>,
    pub shutdown_tx: watch::Sender<()>,
    pub task: tokio::task::JoinHandle<Result<(), relays::error::RelaysError>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let subscriber_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::start_on(subscriber_listener).await
    }

    /// Start a relay whose subscriber endpoint uses an already bound listener.
    pub async fn start_on(subscriber_listener: TcpListener) -> Self {
        let ingress_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ingress = ingress_listener.local_addr().unwrap();
        let subscribers = subscriber_listener.local_addr().unwrap();

        let config = ServerConfig {
            ingress_addr: ingress,
            subscriber_addr: subscribers,
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            max_subscribers: None,
            max_message_size: 1024 * 1024,
            ping_interval: 30,
        };
        let state = Arc::new(ServerState::new(config));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(relays::run_with_shutdown(
            ingress_listener,
            subscriber_listener,
            state.clone(),
            shutdown_rx,
        ));

        Self {
            ingress,
            subscribers,
            state,
            shutdown_tx,
            task,
        }
    }

    pub fn ingress_url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.ingress, path_and_query)
    }

    pub fn server_url(&self) -> String {
        format!("ws://{}", self.subscribers)
    }

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

    pub async fn stop(self) {
        self.shutdown_tx.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

/// Downstream sink recording every request body it receives.
pub struct TestSink {
    pub addr: SocketAddr,
    pub bodies: mpsc::UnboundedReceiver<String>,
    pub calls: Arc<AtomicUsize>,
}

impl TestSink {
    /// Sink answering every request with `status`.
    pub async fn start(status: StatusCode) -> Self {
        Self::start_failing_first(0, status).await
    }

    /// Sink answering the first `failures` requests with `500`, then `status`.
    pub async fn start_failing_first(failures: usize, status: StatusCode) -> Self {
        let (tx, bodies) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let app = Router::new().route(
            "/forward",
            post(move |body: Bytes| {
                let tx = tx.clone();
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(String::from_utf8_lossy(&body).into_owned());
                    if n < failures {
                        StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        status
                    }
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            bodies,
            calls,
        }
    }

    pub async fn recv_body(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.bodies.recv())
            .await
            .expect("timeout waiting for downstream call")
            .expect("sink channel closed")
    }

    /// Assert no further call arrives within a short window.
    pub async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(200), self.bodies.recv()).await;
        assert!(extra.is_err(), "unexpected downstream call: {extra:?}");
    }
}

pub fn client_config(relay: &TestRelay, sink: &TestSink) -> ClientConfig {
    let mut config = ClientConfig {
        server: relay.server_url(),
        ..ClientConfig::default()
    };
    config.downstream.host = "127.0.0.1".to_string();
    config.downstream.port = sink.addr.port();
    config.downstream.body = BodyMode::Raw;
    config.downstream.on_error = OnError::Exit;
    config
}

pub struct TestPump {
    pub status: watch::Receiver<ConnStatus>,
    pub task: tokio::task::JoinHandle<PumpError>,
}

impl TestPump {
    pub fn spawn(config: ClientConfig) -> Self {
        let forwarder = Forwarder::new(&config.downstream).unwrap();
        let (status_tx, status) = watch::channel(ConnStatus::Disconnected);
        let task = tokio::spawn(run_pump(Arc::new(config), forwarder, status_tx));
        Self { status, task }
    }

    /// Wait for the pump to end and return why.
    pub async fn finished(self) -> PumpError {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("timeout waiting for pump to stop")
            .unwrap()
    }
}

/// Spawn a pump against `relay` and wait until the server has registered it.
pub async fn connected_pump(relay: &TestRelay, config: ClientConfig) -> TestPump {
    let pump = TestPump::spawn(config);
    relay.wait_for_subscribers(1).await;
    pump
}
