use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state, flipped once both relay listeners are bound.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a health state that starts out not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the service as ready or not.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Serve `/metrics`, `/health` and `/ready` on `addr`.
///
/// This is a separate listener because the ingress claims every path.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or binding fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Returns 200 when ready, 503 otherwise.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

/// Subscriber gauges.
pub mod gauges {
    /// Increment the active subscribers gauge.
    pub fn inc_subscribers_active() {
        metrics::gauge!("relay_subscribers_active").increment(1.0);
    }

    /// Decrement the active subscribers gauge.
    pub fn dec_subscribers_active() {
        metrics::gauge!("relay_subscribers_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Count one ingress request by HTTP method.
    pub fn ingress_requests_total(method: &str) {
        metrics::counter!("relay_ingress_requests_total", "method" => method.to_string())
            .increment(1);
    }

    /// Count one broadcast, including those with no subscribers.
    pub fn broadcasts_total() {
        metrics::counter!("relay_broadcasts_total").increment(1);
    }

    /// Count one delivery attempt with its outcome label.
    pub fn deliveries_total(outcome: &'static str) {
        metrics::counter!("relay_deliveries_total", "outcome" => outcome).increment(1);
    }

    /// Count a subscriber turned away at the connection limit.
    pub fn subscribers_rejected_total() {
        metrics::counter!("relay_subscribers_rejected_total").increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record how long a fan-out took, in seconds.
    pub fn broadcast_latency_seconds(value: f64) {
        metrics::histogram!("relay_broadcast_latency_seconds").record(value);
    }
}
