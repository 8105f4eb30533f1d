/// Per-provider request metrics.
///
/// Tracks success rates, error counts, and response times for each upstream
/// catalog, fed by the sync engine and the reader proxy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub provider: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub total_response_time_ms: u64,
    pub retry_count: u64,
    pub rate_limit_hits: u64,
    pub timeout_count: u64,
}

impl ProviderMetrics {
    pub fn new(provider: String) -> Self {
        Self {
            provider,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
            retry_count: 0,
            rate_limit_hits: 0,
            timeout_count: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    fn record_success(&mut self, response_time: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_success = Some(Utc::now());

        let response_ms = response_time.as_millis() as u64;
        self.total_response_time_ms += response_ms;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    fn record_failure(&mut self, error: String) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.clone());

        if error.contains("429") || error.to_lowercase().contains("rate limit") {
            self.rate_limit_hits += 1;
        } else if error.to_lowercase().contains("timeout") {
            self.timeout_count += 1;
        }
    }
}

/// Global tracker shared by the sync engine and the reader proxy.
pub struct MetricsTracker {
    metrics: Arc<Mutex<HashMap<String, ProviderMetrics>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn record_success(&self, provider: &str, response_time: Duration) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics
            .entry(provider.to_string())
            .or_insert_with(|| ProviderMetrics::new(provider.to_string()));
        entry.record_success(response_time);

        log::debug!(
            "[{}] Success - Response time: {}ms - Success rate: {:.2}%",
            provider,
            response_time.as_millis(),
            entry.success_rate()
        );
    }

    pub fn record_failure(&self, provider: &str, error: String) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics
            .entry(provider.to_string())
            .or_insert_with(|| ProviderMetrics::new(provider.to_string()));
        entry.record_failure(error.clone());

        log::warn!(
            "[{}] Failure - Error: {} - Success rate: {:.2}%",
            provider,
            error,
            entry.success_rate()
        );
    }

    pub fn record_retry(&self, provider: &str) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics
            .entry(provider.to_string())
            .or_insert_with(|| ProviderMetrics::new(provider.to_string()));
        entry.retry_count += 1;

        log::debug!("[{}] Retry attempt - Total retries: {}", provider, entry.retry_count);
    }

    pub fn get_metrics(&self, provider: &str) -> Option<ProviderMetrics> {
        let metrics = self.metrics.lock().unwrap();
        metrics.get(provider).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<ProviderMetrics> {
        let metrics = self.metrics.lock().unwrap();
        let mut all: Vec<_> = metrics.values().cloned().collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Times an operation and records the outcome under the given provider.
pub async fn track_request<F, T, E>(
    tracker: &MetricsTracker,
    provider: &str,
    operation: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = operation.await;
    match &result {
        Ok(_) => tracker.record_success(provider, start.elapsed()),
        Err(e) => tracker.record_failure(provider, e.to_string()),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_counts_both_outcomes() {
        let tracker = MetricsTracker::new();
        tracker.record_success("mangadex", Duration::from_millis(100));
        tracker.record_success("mangadex", Duration::from_millis(300));
        tracker.record_failure("mangadex", "timeout while connecting".into());

        let m = tracker.get_metrics("mangadex").unwrap();
        assert_eq!(m.total_requests, 3);
        assert_eq!(m.successful_requests, 2);
        assert_eq!(m.timeout_count, 1);
        assert_eq!(m.average_response_time_ms, 200.0);
        assert!((m.success_rate() - 66.66).abs() < 0.1);
    }

    #[test]
    fn failure_categorization_spots_rate_limits() {
        let tracker = MetricsTracker::new();
        tracker.record_failure("comick", "upstream returned 429".into());
        let m = tracker.get_metrics("comick").unwrap();
        assert_eq!(m.rate_limit_hits, 1);
        assert_eq!(m.timeout_count, 0);
    }

    #[tokio::test]
    async fn track_request_records_the_outcome() {
        let tracker = MetricsTracker::new();
        let ok: Result<u32, String> = track_request(&tracker, "mangadex", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        let err: Result<u32, String> =
            track_request(&tracker, "mangadex", async { Err("boom".to_string()) }).await;
        assert!(err.is_err());

        let m = tracker.get_metrics("mangadex").unwrap();
        assert_eq!(m.successful_requests, 1);
        assert_eq!(m.failed_requests, 1);
    }
}
