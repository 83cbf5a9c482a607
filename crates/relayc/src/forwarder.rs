use crate::config::{BodyMode, DownstreamConfig};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from one forward to the downstream sink.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The configured sink address does not form a usable URL.
    #[error("invalid downstream URL: {0}")]
    InvalidUrl(String),
    /// Connection, timeout, or protocol failure.
    #[error("downstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The sink answered with a non-2xx status.
    #[error("downstream returned {0}")]
    Status(StatusCode),
    /// The payload could not be JSON-encoded.
    #[error("payload encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Parses the sink URL, allowing only `http`/`https` with a host.
fn validate_downstream_url(url: &str) -> Result<Url, ForwardError> {
    let parsed = url
        .parse::<Url>()
        .map_err(|e| ForwardError::InvalidUrl(format!("{url}: {e}")))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ForwardError::InvalidUrl(format!(
            "scheme must be http or https, got: {scheme}"
        )));
    }

    if parsed.host_str().is_none() {
        return Err(ForwardError::InvalidUrl("URL must have a host".to_string()));
    }

    Ok(parsed)
}

/// HTTP client posting received payloads to the fixed downstream sink.
#[derive(Clone, Debug)]
pub struct Forwarder {
    http: Client,
    url: Url,
    body: BodyMode,
}

impl Forwarder {
    /// # Errors
    ///
    /// Returns an error if the sink URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &DownstreamConfig) -> Result<Self, ForwardError> {
        let url = validate_downstream_url(&config.url())?;

        let mut builder = Client::builder().redirect(reqwest::redirect::Policy::limited(5));
        if config.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
        }

        Ok(Self {
            http: builder.build()?,
            url,
            body: config.body,
        })
    }

    /// The sink endpoint every forward goes to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request body for `payload` under the configured body mode.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON string encoding fails.
    pub fn encode_body(&self, payload: &str) -> Result<String, ForwardError> {
        match self.body {
            BodyMode::Raw => Ok(payload.to_string()),
            BodyMode::JsonString => Ok(serde_json::to_string(payload)?),
        }
    }

    /// POST `payload` to the sink and wait for the response.
    ///
    /// # Errors
    ///
    /// Returns an error on connection failure, timeout, or a non-2xx status.
    pub async fn forward(&self, payload: &str) -> Result<StatusCode, ForwardError> {
        let body = self.encode_body(payload)?;
        let resp = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(status = %status, url = %self.url, "downstream accepted message");
            Ok(status)
        } else {
            warn!(status = %status, url = %self.url, "downstream returned non-success");
            Err(ForwardError::Status(status))
        }
    }
}
