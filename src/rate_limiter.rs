//! Request-rate limiter for a downstream fetch channel
//!
//! Grants at most one call per `1/qps` seconds across every task holding the
//! same limiter. The lock is held through the sleep so two waiters can never
//! compute the same window; tokio's mutex queues waiters in arrival order.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Lowest accepted rate, keeps the interval finite
const MIN_QPS: f64 = 0.001;

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(qps: f64) -> Self {
        let qps = if qps.is_finite() { qps.max(MIN_QPS) } else { MIN_QPS };
        Self {
            interval: Duration::from_secs_f64(1.0 / qps),
            last: Mutex::new(None),
        }
    }

    /// Minimum spacing between two granted calls
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspend until this caller may proceed
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.interval;
            if Instant::now() < ready_at {
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
