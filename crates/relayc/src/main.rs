#![forbid(unsafe_code)]

use relayc::config::{load_config, Cli};
use relayc::forwarder::Forwarder;
use relayc::pump::{run_pump, ConnStatus};

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut config = load_config(cli.config.as_deref())?;
    config.apply_cli(&cli);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let forwarder = Forwarder::new(&config.downstream)?;
    info!(
        server = %config.server,
        downstream = %forwarder.url(),
        "starting relayc"
    );

    let (status_tx, _status_rx) = watch::channel(ConnStatus::Disconnected);
    let pump = run_pump(Arc::new(config), forwarder, status_tx);

    tokio::select! {
        err = pump => Err(err.into()),
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
