/// Metrics and monitoring for fetch strategies
///
/// Tracks success rates, error counts, and performance metrics for each
/// strategy (`direct`, `browser`, `proxy`)

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyMetrics {
    pub strategy: String,
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

impl StrategyMetrics {
    pub fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
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

    pub fn record_success(&mut self, response_time: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_success = Some(Utc::now());

        let response_ms = u64::try_from(response_time.as_millis()).unwrap_or(u64::MAX);
        self.total_response_time_ms = self.total_response_time_ms.saturating_add(response_ms);
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    pub fn record_failure(&mut self, error: &FetchError) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());

        match error {
            FetchError::Status { status: 429, .. }
            | FetchError::RetriesExhausted { last_status: Some(429), .. } => self.rate_limit_hits += 1,
            e if e.is_timeout() => self.timeout_count += 1,
            _ => {}
        }
    }
}

/// Shared per-strategy metrics
#[derive(Debug, Default)]
pub struct MetricsTracker {
    metrics: Mutex<HashMap<String, StrategyMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // Counters stay usable even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, HashMap<String, StrategyMetrics>> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_entry<R>(&self, strategy: &str, f: impl FnOnce(&mut StrategyMetrics) -> R) -> R {
        let mut metrics = self.lock();
        let entry = metrics
            .entry(strategy.to_string())
            .or_insert_with(|| StrategyMetrics::new(strategy));
        f(entry)
    }

    pub fn record_success(&self, strategy: &str, response_time: Duration) {
        let rate = self.with_entry(strategy, |m| {
            m.record_success(response_time);
            m.success_rate()
        });
        log::debug!(
            "[{}] Success - Response time: {}ms - Success rate: {:.2}%",
            strategy,
            response_time.as_millis(),
            rate
        );
    }

    pub fn record_failure(&self, strategy: &str, error: &FetchError) {
        let rate = self.with_entry(strategy, |m| {
            m.record_failure(error);
            m.success_rate()
        });
        log::warn!(
            "[{}] Failure - Error: {} - Success rate: {:.2}%",
            strategy,
            error,
            rate
        );
    }

    pub fn record_retry(&self, strategy: &str) {
        let retries = self.with_entry(strategy, |m| {
            m.retry_count += 1;
            m.retry_count
        });
        log::debug!("[{}] Retry attempt - Total retries: {}", strategy, retries);
    }

    /// A 429 that was absorbed by a retry
    pub fn record_rate_limit(&self, strategy: &str) {
        self.with_entry(strategy, |m| m.rate_limit_hits += 1);
    }

    pub fn get_metrics(&self, strategy: &str) -> Option<StrategyMetrics> {
        self.lock().get(strategy).cloned()
    }

    /// Every strategy seen so far, sorted by name
    pub fn get_all_metrics(&self) -> Vec<StrategyMetrics> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.strategy.cmp(&b.strategy));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            url: "https://a.test/".into(),
            status: code,
        }
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = StrategyMetrics::new("direct");
        assert_eq!(metrics.strategy, "direct");
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn test_success_rate_calculation() {
        let mut metrics = StrategyMetrics::new("direct");

        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));
        metrics.record_failure(&status(403));

        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.average_response_time_ms, 150.0);
        assert!((metrics.success_rate() - 66.66).abs() < 0.1);
        assert!(metrics.last_error.as_deref().unwrap().contains("403"));
    }

    #[test]
    fn test_failure_categories() {
        let mut metrics = StrategyMetrics::new("proxy");
        metrics.record_failure(&status(429));
        metrics.record_failure(&FetchError::RetriesExhausted {
            url: "https://a.test/".into(),
            attempts: 6,
            last_status: Some(429),
        });
        metrics.record_failure(&status(500));
        assert_eq!(metrics.rate_limit_hits, 2);
        assert_eq!(metrics.timeout_count, 0);
    }

    #[test]
    fn test_tracker() {
        let tracker = MetricsTracker::new();

        tracker.record_success("proxy", Duration::from_millis(100));
        tracker.record_failure("direct", &status(404));
        tracker.record_retry("proxy");
        tracker.record_rate_limit("proxy");

        let proxy = tracker.get_metrics("proxy").unwrap();
        assert_eq!(proxy.success_rate(), 100.0);
        assert_eq!(proxy.retry_count, 1);
        assert_eq!(proxy.rate_limit_hits, 1);
        assert_eq!(tracker.get_metrics("direct").unwrap().success_rate(), 0.0);

        let all = tracker.get_all_metrics();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].strategy, "direct");
    }
}
