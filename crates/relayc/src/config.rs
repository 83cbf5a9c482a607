use clap::Parser;
use relay_common::types::{
    DEFAULT_DOWNSTREAM_HOST, DEFAULT_DOWNSTREAM_PATH, DEFAULT_DOWNSTREAM_PORT,
    DEFAULT_SUBSCRIBER_PORT,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI interface for the forwarding client.
#[derive(Parser, Debug)]
#[command(name = "relayc", about = "Forward relay broadcasts to a downstream HTTP sink")]
#[command(version)]
pub struct Cli {
    /// Path to a custom configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Relay server subscriber URL override.
    #[arg(long)]
    pub server: Option<String>,

    /// Downstream sink host override.
    #[arg(long)]
    pub downstream_host: Option<String>,

    /// Downstream sink port override.
    #[arg(long)]
    pub downstream_port: Option<u16>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// How the received payload is placed in the downstream request body.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyMode {
    /// The payload text, unchanged.
    #[default]
    Raw,
    /// The payload encoded as a JSON string literal.
    JsonString,
}

/// What to do when a forward fails.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Stop the client with a non-zero exit code.
    #[default]
    Exit,
    /// Log the failure and continue with the next message.
    Skip,
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay server's subscriber endpoint.
    pub server: String,
    /// Downstream sink settings.
    pub downstream: DownstreamConfig,
    /// Reconnection backoff settings.
    pub reconnect: ReconnectConfig,
}

/// Fixed downstream sink the forwarder posts to.
#[derive(Debug, Deserialize, Clone)]
pub struct DownstreamConfig {
    /// Sink host name or address.
    pub host: String,
    /// Sink port.
    pub port: u16,
    /// Request path on the sink.
    pub path: String,
    /// Body encoding of forwarded payloads.
    pub body: BodyMode,
    /// Failure policy for forwards.
    pub on_error: OnError,
    /// Per-request timeout in milliseconds, `0` to wait indefinitely.
    pub timeout_ms: u64,
}

/// Reconnect backoff parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Whether a lost subscription is re-established.
    pub enabled: bool,
    /// Initial delay before the first reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("ws://localhost:{DEFAULT_SUBSCRIBER_PORT}"),
            downstream: DownstreamConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DOWNSTREAM_HOST.to_string(),
            port: DEFAULT_DOWNSTREAM_PORT,
            path: DEFAULT_DOWNSTREAM_PATH.to_string(),
            body: BodyMode::Raw,
            on_error: OnError::Exit,
            timeout_ms: 0,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: 100,
            max_delay_ms: 30000,
            backoff_factor: 2.0,
        }
    }
}

impl DownstreamConfig {
    /// Full URL of the sink endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }
}

impl ClientConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.is_empty() {
            return Err("server URL must not be empty".to_string());
        }
        if !(self.server.starts_with("ws://") || self.server.starts_with("wss://")) {
            return Err(format!(
                "server URL must start with ws:// or wss://, got: {}",
                self.server
            ));
        }

        if self.downstream.host.is_empty() {
            return Err("downstream.host must not be empty".to_string());
        }
        if self.downstream.port == 0 {
            return Err("downstream.port must be greater than 0".to_string());
        }
        if !self.downstream.path.starts_with('/') {
            return Err(format!(
                "downstream.path must start with '/', got: {}",
                self.downstream.path
            ));
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be >= initial_delay_ms".to_string());
        }
        if !self.reconnect.backoff_factor.is_finite() || self.reconnect.backoff_factor <= 0.0 {
            return Err(
                "reconnect.backoff_factor must be a finite number greater than 0".to_string(),
            );
        }

        Ok(())
    }

    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(ref server) = cli.server {
            self.server = server.clone();
        }
        if let Some(ref host) = cli.downstream_host {
            self.downstream.host = host.clone();
        }
        if let Some(port) = cli.downstream_port {
            self.downstream.port = port;
        }
    }
}

/// Load defaults, then the TOML file, then `RELAYC_*` environment variables
/// (nested keys use `__`, e.g. `RELAYC_DOWNSTREAM__PORT`).
///
/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let defaults = ClientConfig::default();
    let mut builder = config::Config::builder()
        .set_default("server", defaults.server.as_str())?
        .set_default("downstream.host", defaults.downstream.host.as_str())?
        .set_default("downstream.port", i64::from(defaults.downstream.port))?
        .set_default("downstream.path", defaults.downstream.path.as_str())?
        .set_default("downstream.body", "raw")?
        .set_default("downstream.on_error", "exit")?
        .set_default("downstream.timeout_ms", defaults.downstream.timeout_ms as i64)?
        .set_default("reconnect.enabled", defaults.reconnect.enabled)?
        .set_default(
            "reconnect.initial_delay_ms",
            defaults.reconnect.initial_delay_ms as i64,
        )?
        .set_default(
            "reconnect.max_delay_ms",
            defaults.reconnect.max_delay_ms as i64,
        )?
        .set_default(
            "reconnect.backoff_factor",
            defaults.reconnect.backoff_factor,
        )?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else {
        // Platform-native config dir first, then ~/.config/relayc/.
        let native_path = dirs::config_dir().map(|d| d.join("relayc").join("config.toml"));
        let xdg_path =
            dirs::home_dir().map(|d| d.join(".config").join("relayc").join("config.toml"));

        let resolved = native_path
            .filter(|p| p.exists())
            .or_else(|| xdg_path.filter(|p| p.exists()));

        if let Some(config_path) = resolved {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RELAYC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build()?;
    let config: ClientConfig = settings.try_deserialize()?;

    Ok(config)
}
