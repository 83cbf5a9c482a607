//! HTTP ingress: every request, whatever its method or path, becomes one
//! broadcast envelope.

use crate::broadcast::broadcast;
use crate::metrics::counters;
use crate::server::ServerState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use relay_common::types::INGRESS_ACK;
use relay_common::Envelope;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Router whose fallback accepts any method on any path.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new().fallback(ingress_handler).with_state(state)
}

/// Normalize a request into an envelope.
///
/// Header and query values are taken verbatim; repeated names keep the last
/// value. Header values and the body are decoded as lossy UTF-8.
///
/// Header names arrive lowercased: hyper normalizes them on parse and exposes
/// no record of the original spelling, so `X-Test` is relayed as `x-test`.
/// Lookups through [`Envelope::header`] are case-insensitive.
#[must_use]
pub fn envelope_from_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    query: Vec<(String, String)>,
    body: &[u8],
) -> Envelope {
    let mut envelope = Envelope::new(method.as_str(), uri.path());
    for (name, value) in headers {
        envelope = envelope.with_header(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    for (key, value) in query {
        envelope = envelope.with_query(key, value);
    }
    envelope.with_body(String::from_utf8_lossy(body).into_owned())
}

/// Relay the request and acknowledge it.
///
/// The response is always `200` with [`INGRESS_ACK`]: it confirms the
/// request was accepted for relay, not that any subscriber got it.
async fn ingress_handler(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    query: Option<Query<Vec<(String, String)>>>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    counters::ingress_requests_total(method.as_str());

    let query = query.map(|Query(pairs)| pairs).unwrap_or_default();
    let envelope = envelope_from_request(&method, &uri, &headers, query, &body);
    info!(
        method = %method,
        path = %uri.path(),
        headers = envelope.headers().len(),
        body_bytes = body.len(),
        "ingress request"
    );

    match broadcast(&state.registry, &envelope).await {
        Ok(report) => {
            debug!(
                attempted = report.attempted(),
                sent = report.sent(),
                "ingress request relayed"
            );
        }
        Err(e) => {
            warn!(error = %e, "failed to relay ingress request");
        }
    }

    (StatusCode::OK, INGRESS_ACK)
}
