//! Remote-rendering proxy strategy (ScrapeOps-compatible API)
//!
//! Every attempt first waits on the shared [`RateLimiter`]. A 429 sleeps for
//! `Retry-After` when the proxy sends it, otherwise for the current backoff,
//! which grows by `backoff_multiplier` up to `backoff_cap_ms`. 5xx answers and
//! transport failures back off the same way. Any other non-2xx status fails
//! immediately.

use crate::config::ProxyConfig;
use crate::error::{parse_retry_after, FetchError};
use crate::metrics::MetricsTracker;
use crate::rate_limiter::RateLimiter;
use reqwest::header::{RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const PROXY_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36";
const METRICS_KEY: &str = "proxy";

pub struct ProxyClient {
    client: Client,
    config: ProxyConfig,
    limiter: Arc<RateLimiter>,
    metrics: Option<Arc<MetricsTracker>>,
}

impl ProxyClient {
    /// Client with its own limiter at `config.qps`
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let limiter = Arc::new(RateLimiter::new(config.qps));
        Self::with_limiter(config, limiter)
    }

    /// Client sharing an existing limiter
    pub fn with_limiter(config: ProxyConfig, limiter: Arc<RateLimiter>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            limiter,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsTracker>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// Delay before retry number `retry` (0-based) when the proxy gave no hint
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let base = self.config.backoff_base_ms as f64;
        let factor = self.config.backoff_multiplier.max(1.0).powi(retry as i32);
        let ms = (base * factor).min(self.config.backoff_cap_ms as f64);
        Duration::from_millis(ms.round() as u64)
    }

    fn query(&self, url: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("api_key", self.config.api_key.clone()),
            ("url", url.to_string()),
            ("country", self.config.country.clone()),
        ];
        if self.config.render_js {
            params.push(("render_js", "true".to_string()));
        }
        params
    }

    fn note_retry(&self, rate_limited: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_retry(METRICS_KEY);
            if rate_limited {
                metrics.record_rate_limit(METRICS_KEY);
            }
        }
    }

    async fn send(&self, url: &str) -> Result<Response, FetchError> {
        if !self.config.is_configured() {
            return Err(FetchError::Disabled {
                strategy: METRICS_KEY.to_string(),
                url: url.to_string(),
            });
        }

        let attempts = self.config.max_retries.max(1);
        let mut retry = 0u32;
        let mut last_status = None;

        for attempt in 1..=attempts {
            self.limiter.wait().await;

            let result = self
                .client
                .get(&self.config.endpoint)
                .query(&self.query(url))
                .header(USER_AGENT, PROXY_USER_AGENT)
                .send()
                .await;

            let is_last = attempt == attempts;
            let delay = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().as_u16() == 429 => {
                    last_status = Some(429);
                    let hinted = parse_retry_after(
                        response
                            .headers()
                            .get(RETRY_AFTER)
                            .and_then(|v| v.to_str().ok()),
                    );
                    log::warn!(
                        "Proxy rate limited on {} (attempt {}/{}), retry-after: {:?}",
                        url,
                        attempt,
                        attempts,
                        hinted
                    );
                    self.note_retry(true);
                    match hinted {
                        Some(d) => d,
                        None => {
                            let d = self.backoff_delay(retry);
                            retry += 1;
                            d
                        }
                    }
                }
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status().as_u16();
                    last_status = Some(status);
                    log::warn!("Proxy answered {} for {} (attempt {}/{})", status, url, attempt, attempts);
                    self.note_retry(false);
                    let d = self.backoff_delay(retry);
                    retry += 1;
                    d
                }
                Ok(response) => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: response.status().as_u16(),
                    });
                }
                Err(e) => {
                    log::warn!("Proxy request failed for {} (attempt {}/{}): {}", url, attempt, attempts, e);
                    if is_last {
                        return Err(FetchError::transport(url, e));
                    }
                    self.note_retry(false);
                    let d = self.backoff_delay(retry);
                    retry += 1;
                    d
                }
            };

            if !is_last {
                sleep(delay).await;
            }
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last_status,
        })
    }

    pub async fn get_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self.send(url).await?;
        response.text().await.map_err(|e| FetchError::transport(url, e))
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.send(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(url, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_ms: u64, mult: f64, cap_ms: u64) -> ProxyClient {
        ProxyClient::new(ProxyConfig {
            api_key: "k".into(),
            backoff_base_ms: base_ms,
            backoff_multiplier: mult,
            backoff_cap_ms: cap_ms,
            ..ProxyConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let c = client(1000, 1.8, 15_000);
        assert_eq!(c.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(c.backoff_delay(1), Duration::from_millis(1800));
        assert_eq!(c.backoff_delay(2), Duration::from_millis(3240));
        assert_eq!(c.backoff_delay(10), Duration::from_millis(15_000));
    }

    #[test]
    fn test_query_params() {
        let mut c = client(1000, 1.8, 15_000);
        assert!(!c.query("https://a.test/").iter().any(|(k, _)| *k == "render_js"));
        c.config.render_js = true;
        let q = c.query("https://a.test/");
        assert!(q.contains(&("url", "https://a.test/".to_string())));
        assert!(q.contains(&("country", "fr".to_string())));
        assert!(q.contains(&("render_js", "true".to_string())));
    }

    #[tokio::test]
    async fn test_missing_key_is_disabled() {
        let c = ProxyClient::new(ProxyConfig::default()).unwrap();
        let err = c.get_html("https://a.test/").await.unwrap_err();
        assert!(matches!(err, FetchError::Disabled { .. }));
    }
}
