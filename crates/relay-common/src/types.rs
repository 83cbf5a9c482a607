//! Protocol constants shared by `relays` and `relayc`.

/// Default port of the HTTP ingress listener.
pub const DEFAULT_INGRESS_PORT: u16 = 8080;

/// Default port of the WebSocket subscriber listener.
pub const DEFAULT_SUBSCRIBER_PORT: u16 = 8081;

/// Default host of the downstream sink.
pub const DEFAULT_DOWNSTREAM_HOST: &str = "localhost";

/// Default port of the downstream sink.
pub const DEFAULT_DOWNSTREAM_PORT: u16 = 8082;

/// Default request path on the downstream sink.
pub const DEFAULT_DOWNSTREAM_PATH: &str = "/forward";

/// Body returned by the ingress for every request.
///
/// It only confirms the request was accepted for relay, not that any
/// subscriber received it.
pub const INGRESS_ACK: &str = "Request forwarded to WebSocket clients.";
