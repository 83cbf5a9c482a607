#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use relays::config::{Args, ServerConfig};
use relays::metrics::{start_metrics_server, HealthState};
use relays::{run_with_shutdown, ServerState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config: ServerConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let ingress = TcpListener::bind(config.ingress_addr).await?;
    let subscribers = TcpListener::bind(config.subscriber_addr).await?;
    info!(
        ingress = %config.ingress_addr,
        subscribers = %config.subscriber_addr,
        max_subscribers = ?config.max_subscribers,
        "bound relay listeners"
    );

    let health_state = HealthState::new();
    tokio::spawn({
        let health_state = health_state.clone();
        let metrics_addr = config.metrics_addr;
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let state = Arc::new(ServerState::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let mut server = tokio::spawn(run_with_shutdown(ingress, subscribers, state, shutdown_rx));
    health_state.set_ready(true);

    tokio::select! {
        result = &mut server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            health_state.set_ready(false);
            let _ = shutdown_tx.send(());
            server.await??;
        }
    }

    Ok(())
}
