//! Retry transport for all outbound provider traffic.
//!
//! Retries are limited to transient network faults (timeouts, connection
//! resets, request-level failures). A received HTTP status is never retried
//! here; it is handed back for the caller to interpret. The policy is split
//! into pure functions so the control flow stays a small testable loop.

use reqwest::{Client, ClientBuilder, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics::MetricsTracker;

const USER_AGENT: &str = "tankobon/0.3 (+https://github.com/tankobon)";

/// Transient means the fault happened below the HTTP layer and a repeat of
/// the same request can plausibly succeed.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

pub fn should_retry(err: &reqwest::Error, attempt: usize, max_attempts: usize) -> bool {
    attempt < max_attempts && is_transient(err)
}

/// Delay before retry `attempt` (1-based): base * 2^(attempt-1), no jitter.
pub fn retry_delay(attempt: usize, base_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16) as u32;
    Duration::from_millis(base_ms.saturating_mul(1u64 << exp))
}

#[derive(Clone)]
pub struct RetryTransport {
    client: Client,
    config: RetryConfig,
    metrics: Option<(Arc<MetricsTracker>, String)>,
}

impl RetryTransport {
    pub fn new(config: RetryConfig) -> Result<Self, reqwest::Error> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, config, metrics: None })
    }

    /// Tally retries against `label` in the shared metrics tracker.
    pub fn with_metrics(mut self, metrics: Arc<MetricsTracker>, label: &str) -> Self {
        self.metrics = Some((metrics, label.to_string()));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// GET with bounded retry. Any received response, error status included,
    /// is returned to the caller; only transport-level faults are retried.
    pub async fn get(&self, url: &str) -> ApiResult<Response> {
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.client.get(url).send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !should_retry(&e, attempt, max) {
                        if is_transient(&e) {
                            log::warn!("giving up on {} after {} attempts: {}", url, attempt, e);
                            return Err(ApiError::UpstreamUnavailable(e.to_string()));
                        }
                        return Err(ApiError::UpstreamUnavailable(format!(
                            "request to {} failed: {}",
                            url, e
                        )));
                    }
                    if let Some((metrics, label)) = &self.metrics {
                        metrics.record_retry(label);
                    }
                    let delay = retry_delay(attempt, self.config.base_delay_ms);
                    log::warn!(
                        "transient failure for {} (attempt {}/{}), retrying in {:?}: {}",
                        url,
                        attempt,
                        max,
                        delay,
                        e
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = self.get(url).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(format!("upstream 404 for {}", url)));
        }
        if !status.is_success() {
            return Err(ApiError::UpstreamUnavailable(format!(
                "upstream returned {} for {}",
                status, url
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Fetch raw bytes plus the reported content type.
    pub async fn get_bytes(&self, url: &str) -> ApiResult<(Vec<u8>, String)> {
        let response = self.get(url).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(format!("upstream 404 for {}", url)));
        }
        if !status.is_success() {
            return Err(ApiError::UpstreamUnavailable(format!(
                "upstream returned {} for {}",
                status, url
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;
        Ok((bytes.to_vec(), content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_schedule_doubles_without_jitter() {
        assert_eq!(retry_delay(1, 100), Duration::from_millis(100));
        assert_eq!(retry_delay(2, 100), Duration::from_millis(200));
        assert_eq!(retry_delay(3, 100), Duration::from_millis(400));
        assert_eq!(retry_delay(1, 250), Duration::from_millis(250));
    }

    #[test]
    fn delay_schedule_saturates() {
        // Pathological attempt counts must not overflow.
        let d = retry_delay(500, u64::MAX);
        assert!(d >= Duration::from_millis(1));
    }

    #[tokio::test]
    async fn transport_creation() {
        let transport = RetryTransport::new(RetryConfig::default());
        assert!(transport.is_ok());
    }
}
