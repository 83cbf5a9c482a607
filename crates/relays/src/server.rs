use crate::config::ServerConfig;
use crate::error::RelaysError;
use crate::ingress;
use crate::registry::ConnectionRegistry;
use crate::session::handle_subscriber;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long shutdown waits for subscriber sessions to close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the relay server.
pub struct ServerState {
    /// Currently registered subscriber connections.
    pub registry: ConnectionRegistry,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// One permit per allowed subscriber, when a limit is configured.
    pub subscriber_slots: Option<Semaphore>,
}

impl ServerState {
    /// Build state with an empty registry.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let subscriber_slots = config.max_subscribers.map(Semaphore::new);
        Self {
            registry: ConnectionRegistry::new(),
            config,
            subscriber_slots,
        }
    }
}

/// Run both listeners with an externally-controlled shutdown signal.
///
/// A value sent on (or the drop of) the sender behind `shutdown` stops both
/// listeners, closes subscriber sessions, and waits for them to finish.
///
/// # Errors
///
/// Returns an error if either listener encounters an I/O failure.
pub async fn run_with_shutdown(
    ingress: TcpListener,
    subscribers: TcpListener,
    state: Arc<ServerState>,
    shutdown: watch::Receiver<()>,
) -> Result<(), RelaysError> {
    tokio::try_join!(
        run_ingress(ingress, state.clone(), shutdown.clone()),
        run_subscriber_listener(subscribers, state, shutdown),
    )?;
    info!("server shut down gracefully");
    Ok(())
}

/// Serve the HTTP ingress on `listener`.
///
/// # Errors
///
/// Returns an error if the HTTP server fails.
pub async fn run_ingress(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), RelaysError> {
    let local_addr = listener.local_addr()?;
    info!("ingress listening on {}", local_addr);
    axum::serve(listener, ingress::router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// Accept subscriber connections on `listener`, one session task each.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read.
pub async fn run_subscriber_listener(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: watch::Receiver<()>,
) -> Result<(), RelaysError> {
    let local_addr = listener.local_addr()?;
    info!("subscriber endpoint listening on {}", local_addr);
    let mut stop = shutdown.clone();
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        let shutdown = shutdown.clone();
                        sessions.spawn(async move {
                            if let Err(e) = handle_subscriber(stream, peer, state, shutdown).await {
                                tracing::debug!("subscriber {} closed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!("subscriber session panicked: {}", e);
                    }
                }
            }
            _ = stop.changed() => {
                info!("shutdown signal received, draining {} subscribers", sessions.len());
                break;
            }
        }
    }

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !sessions.is_empty() {
        match tokio::time::timeout_at(deadline, sessions.join_next()).await {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "drain timeout reached with {} subscribers still active",
                    sessions.len()
                );
                sessions.abort_all();
                break;
            }
        }
    }

    Ok(())
}
