use clap::Parser;
use relay_common::types::{DEFAULT_INGRESS_PORT, DEFAULT_SUBSCRIBER_PORT};
use std::net::{IpAddr, SocketAddr};

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "relays")]
#[command(about = "HTTP to WebSocket broadcast relay")]
#[command(version)]
pub struct Args {
    /// Address both listeners bind to.
    #[arg(long, default_value = "0.0.0.0", env = "RELAYS_BIND")]
    pub bind: IpAddr,
    /// Port of the HTTP ingress listener.
    #[arg(long, default_value_t = DEFAULT_INGRESS_PORT, env = "RELAYS_INGRESS_PORT")]
    pub ingress_port: u16,
    /// Port of the WebSocket subscriber listener.
    #[arg(long, default_value_t = DEFAULT_SUBSCRIBER_PORT, env = "RELAYS_SUBSCRIBER_PORT")]
    pub subscriber_port: u16,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "RELAYS_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent subscribers. Unbounded when unset.
    #[arg(long, env = "RELAYS_MAX_SUBSCRIBERS")]
    pub max_subscribers: Option<usize>,
    /// Maximum inbound WebSocket message size in bytes.
    #[arg(long, default_value = "16777216", env = "RELAYS_MAX_MESSAGE")]
    pub max_message_size: usize,
    /// Interval between keepalive pings to subscribers, in seconds.
    #[arg(long, default_value = "30", env = "RELAYS_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the HTTP ingress listener.
    pub ingress_addr: SocketAddr,
    /// Address of the WebSocket subscriber listener.
    pub subscriber_addr: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent subscribers, `None` for no limit.
    pub max_subscribers: Option<usize>,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between keepalive pings in seconds.
    pub ping_interval: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        // Port 0 is allowed so tests can bind ephemeral ports, but the two
        // listeners must not collide.
        if self.ingress_addr.port() != 0 && self.ingress_addr == self.subscriber_addr {
            return Err("ingress_port and subscriber_port must differ".to_string());
        }

        if let Some(max) = self.max_subscribers {
            if max == 0 {
                return Err("max_subscribers must be greater than 0".to_string());
            }
        }

        if self.max_message_size == 0 {
            return Err("max_message_size must be greater than 0".to_string());
        }
        if self.max_message_size > 64 * 1024 * 1024 {
            return Err("max_message_size exceeds reasonable limit (64 MiB)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            ingress_addr: SocketAddr::new(args.bind, args.ingress_port),
            subscriber_addr: SocketAddr::new(args.bind, args.subscriber_port),
            metrics_addr: args.metrics_addr,
            max_subscribers: args.max_subscribers,
            max_message_size: args.max_message_size,
            ping_interval: args.ping_interval,
        }
    }
}
