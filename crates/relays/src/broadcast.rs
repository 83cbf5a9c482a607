//! Fan-out of one envelope to every registered subscriber.

use crate::error::RelaysError;
use crate::metrics::{counters, histograms};
use crate::registry::{ConnId, ConnectionRegistry, SubscriberHandle};
use futures_util::future::join_all;
use relay_common::Envelope;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// One serialized envelope on its way into a session task.
///
/// The session reports the result of its WebSocket write on `ack`.
#[derive(Debug)]
pub struct Delivery {
    /// Serialized envelope, shared between all recipients of a broadcast.
    pub payload: Arc<str>,
    /// Write result; an `Err` carries the transport error text.
    pub ack: oneshot::Sender<Result<(), String>>,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The frame was written to the subscriber's socket.
    Sent,
    /// The session was already gone before the write happened.
    Closed,
    /// The write failed.
    Failed(String),
}

impl DeliveryOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Closed => "closed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Per-member outcomes of one broadcast.
#[derive(Debug, Default, Clone)]
pub struct BroadcastReport {
    /// Outcome for every member of the snapshot.
    pub outcomes: Vec<(ConnId, DeliveryOutcome)>,
}

impl BroadcastReport {
    /// Number of delivery attempts made.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of attempts whose write completed.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == DeliveryOutcome::Sent)
            .count()
    }

    /// Number of attempts that did not reach the socket.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.attempted() - self.sent()
    }
}

/// Hand a payload to one session and wait for its write result.
pub async fn deliver(handle: &SubscriberHandle, payload: Arc<str>) -> DeliveryOutcome {
    let (ack_tx, ack_rx) = oneshot::channel();
    let delivery = Delivery {
        payload,
        ack: ack_tx,
    };
    if handle.tx.send(delivery).await.is_err() {
        return DeliveryOutcome::Closed;
    }
    match ack_rx.await {
        Ok(Ok(())) => DeliveryOutcome::Sent,
        Ok(Err(reason)) => DeliveryOutcome::Failed(reason),
        Err(_) => DeliveryOutcome::Closed,
    }
}

/// Serialize `envelope` once and deliver it to every current subscriber.
///
/// # Errors
///
/// Returns an error only if the envelope cannot be serialized. Delivery
/// failures are reported per member in the returned report.
pub async fn broadcast(
    registry: &ConnectionRegistry,
    envelope: &Envelope,
) -> Result<BroadcastReport, RelaysError> {
    let payload: Arc<str> = envelope.to_json()?.into();
    Ok(broadcast_text(registry, payload).await)
}

/// Deliver an already-serialized payload to every current subscriber.
///
/// Attempts run concurrently and independently; the call returns once each
/// one has completed or failed.
pub async fn broadcast_text(registry: &ConnectionRegistry, payload: Arc<str>) -> BroadcastReport {
    let members = registry.snapshot();
    counters::broadcasts_total();

    if members.is_empty() {
        info!("no subscribers connected");
        return BroadcastReport::default();
    }

    let start = Instant::now();
    let attempts = members.iter().map(|handle| {
        let payload = Arc::clone(&payload);
        async move { (handle.id, deliver(handle, payload).await) }
    });
    let outcomes = join_all(attempts).await;
    histograms::broadcast_latency_seconds(start.elapsed().as_secs_f64());

    for (id, outcome) in &outcomes {
        counters::deliveries_total(outcome.label());
        if let DeliveryOutcome::Failed(reason) = outcome {
            debug!(conn = id, reason = %reason, "delivery failed");
        }
    }

    let report = BroadcastReport { outcomes };
    info!(
        subscribers = report.attempted(),
        sent = report.sent(),
        failed = report.failed(),
        "broadcast complete"
    );
    report
}
