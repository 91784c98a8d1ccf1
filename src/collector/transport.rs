//! Delivery of payloads to the ingestion endpoint

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::payload::Payload;
use super::redact::truncate_chars;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics;

/// Longest response body kept in a rejection error
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Single-attempt HTTP sender for payloads.
///
/// There are no retries: a failed delivery is reported to the caller, which
/// logs it and moves on.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl Transport {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("querylens/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            config.token.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// True for calls aimed at the ingestion endpoint itself
    pub fn is_telemetry_url(&self, url: &str) -> bool {
        match (url::Url::parse(url), url::Url::parse(&self.endpoint)) {
            (Ok(target), Ok(endpoint)) => {
                target.host_str().is_some()
                    && target.host_str() == endpoint.host_str()
                    && target.port_or_known_default() == endpoint.port_or_known_default()
                    && target.path() == endpoint.path()
            }
            _ => false,
        }
    }

    /// POST `payload` as JSON with Bearer authentication.
    pub async fn send(&self, payload: &Payload) -> Result<()> {
        let started = Instant::now();
        let result = self.post(payload).await;
        metrics::record_send_duration(started.elapsed());

        match &result {
            Ok(()) => {
                metrics::record_payload("sent");
                debug!(
                    trace_id = %payload.trace_id,
                    queries = payload.queries.len(),
                    logs = payload.logs.len(),
                    "Telemetry payload delivered"
                );
            }
            Err(e) => {
                metrics::record_payload(e.kind());
                warn!(trace_id = %payload.trace_id, error = %e, "Telemetry payload not delivered");
            }
        }

        result
    }

    async fn post(&self, payload: &Payload) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Rejected {
            status,
            message: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
        })
    }
}
