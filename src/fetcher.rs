//! Fetch strategy selection
//!
//! Three backends share one capability: fetch a page as HTML or a resource as
//! bytes. Which backend serves a request depends on the resource class and
//! the configured [`StrategyChoice`]. `auto` walks the configured priority
//! list, skipping backends that are not enabled, and moves to the next one on
//! an error or on a page the caller does not accept.

use crate::browser_client::{BrowserClient, BrowserConfig};
use crate::config::{Config, StrategyConfig};
use crate::error::FetchError;
use crate::http_client::{DirectClient, HttpClientConfig};
use crate::metrics::MetricsTracker;
use crate::proxy_client::ProxyClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Direct,
    Browser,
    Proxy,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Direct => "direct",
            StrategyKind::Browser => "browser",
            StrategyKind::Proxy => "proxy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-resource-class strategy setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyChoice {
    #[default]
    Auto,
    Direct,
    Browser,
    Proxy,
}

impl StrategyChoice {
    fn as_str(&self) -> &'static str {
        match self {
            StrategyChoice::Auto => "auto",
            StrategyChoice::Direct => "direct",
            StrategyChoice::Browser => "browser",
            StrategyChoice::Proxy => "proxy",
        }
    }

    fn fixed(&self) -> Option<StrategyKind> {
        match self {
            StrategyChoice::Auto => None,
            StrategyChoice::Direct => Some(StrategyKind::Direct),
            StrategyChoice::Browser => Some(StrategyKind::Browser),
            StrategyChoice::Proxy => Some(StrategyKind::Proxy),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Chapter-listing page
    Series,
    /// Reader page of one chapter
    Chapter,
    Image,
}

/// Page check deciding whether `auto` keeps a page or tries the next strategy
pub type AcceptPage<'a> = dyn for<'h> Fn(&'h str) -> bool + Send + Sync + 'a;

/// What the pipeline needs from the network
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page; `accept` rejects pages that should make `auto` try the
    /// next strategy
    async fn fetch_html(
        &self,
        url: &str,
        class: ResourceClass,
        accept: &AcceptPage<'_>,
    ) -> Result<String, FetchError>;

    /// Fetch an image
    async fn fetch_bytes(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, FetchError>;

    /// True when images are routed through the rate-limited proxy
    fn images_via_proxy(&self) -> bool {
        false
    }
}

/// One fetch backend
pub enum Backend {
    Direct(DirectClient),
    Browser(Arc<BrowserClient>),
    Proxy(ProxyClient),
}

impl Backend {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Backend::Direct(_) => StrategyKind::Direct,
            Backend::Browser(_) => StrategyKind::Browser,
            Backend::Proxy(_) => StrategyKind::Proxy,
        }
    }

    async fn fetch_html(&self, url: &str, class: ResourceClass) -> Result<String, FetchError> {
        match self {
            Backend::Direct(client) => client.get_html(url).await,
            Backend::Browser(client) => client.fetch_html(url, class).await,
            Backend::Proxy(client) => client.get_html(url).await,
        }
    }

    async fn fetch_bytes(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, FetchError> {
        match self {
            Backend::Direct(client) => client.get_bytes(url, referer).await,
            Backend::Proxy(client) => client.get_bytes(url).await,
            Backend::Browser(_) => Err(FetchError::Disabled {
                strategy: "browser (images)".to_string(),
                url: url.to_string(),
            }),
        }
    }
}

/// The configured backends plus the selection rules
pub struct StrategyChain {
    backends: Vec<Backend>,
    strategies: StrategyConfig,
    metrics: Arc<MetricsTracker>,
}

impl StrategyChain {
    pub fn new(backends: Vec<Backend>, strategies: StrategyConfig, metrics: Arc<MetricsTracker>) -> Self {
        Self {
            backends,
            strategies,
            metrics,
        }
    }

    /// Direct is always available; the proxy needs an API key and the
    /// browser needs `fetch.enable_browser`
    pub fn from_config(cfg: &Config, metrics: Arc<MetricsTracker>) -> Result<Self, reqwest::Error> {
        let mut backends = vec![Backend::Direct(DirectClient::with_config(
            HttpClientConfig::from(&cfg.fetch),
        )?)];

        if cfg.proxy.is_configured() {
            let proxy = ProxyClient::new(cfg.proxy.clone())?.with_metrics(metrics.clone());
            backends.push(Backend::Proxy(proxy));
        } else {
            log::info!("Proxy strategy disabled (no API key)");
        }

        if cfg.fetch.enable_browser {
            backends.push(Backend::Browser(Arc::new(BrowserClient::new(
                BrowserConfig::from(&cfg.fetch),
            ))));
        } else {
            log::info!("Browser strategy disabled");
        }

        Ok(Self::new(backends, cfg.strategies.clone(), metrics))
    }

    pub fn metrics(&self) -> &Arc<MetricsTracker> {
        &self.metrics
    }

    fn backend(&self, kind: StrategyKind) -> Option<&Backend> {
        self.backends.iter().find(|b| b.kind() == kind)
    }

    fn choice_for(&self, class: ResourceClass) -> StrategyChoice {
        match class {
            ResourceClass::Series => self.strategies.series,
            ResourceClass::Chapter => self.strategies.chapters,
            ResourceClass::Image => self.strategies.images,
        }
    }

    /// Backends to try for `class`, in order
    pub fn candidates(&self, class: ResourceClass) -> Vec<&Backend> {
        let choice = self.choice_for(class);
        let kinds: Vec<StrategyKind> = match choice.fixed() {
            Some(kind) => vec![kind],
            None => self.strategies.priority.clone(),
        };
        kinds
            .into_iter()
            .filter(|k| class != ResourceClass::Image || *k != StrategyKind::Browser)
            .filter_map(|k| self.backend(k))
            .collect()
    }

    fn disabled(&self, class: ResourceClass, url: &str) -> FetchError {
        FetchError::Disabled {
            strategy: self.choice_for(class).as_str().to_string(),
            url: url.to_string(),
        }
    }
}

/// Outcome bookkeeping shared by the html and bytes paths
fn finish<T>(url: &str, fallback: Option<T>, mut failures: Vec<(StrategyKind, FetchError)>) -> Result<T, FetchError> {
    if let Some(value) = fallback {
        return Ok(value);
    }
    if failures.len() == 1 {
        if let Some((_, e)) = failures.pop() {
            return Err(e);
        }
    }
    Err(FetchError::AllStrategiesFailed {
        url: url.to_string(),
        errors: failures
            .into_iter()
            .map(|(kind, e)| format!("{}: {}", kind, e))
            .collect(),
    })
}

#[async_trait]
impl PageFetcher for StrategyChain {
    async fn fetch_html(
        &self,
        url: &str,
        class: ResourceClass,
        accept: &AcceptPage<'_>,
    ) -> Result<String, FetchError> {
        let candidates = self.candidates(class);
        if candidates.is_empty() {
            return Err(self.disabled(class, url));
        }

        let mut failures = Vec::new();
        let mut fallback = None;
        for backend in candidates {
            let kind = backend.kind();
            let start = Instant::now();
            match backend.fetch_html(url, class).await {
                Ok(html) => {
                    self.metrics.record_success(kind.as_str(), start.elapsed());
                    if accept(&html) {
                        log::info!("Fetched {:?} page {} via {}", class, url, kind);
                        return Ok(html);
                    }
                    log::info!("{} returned nothing usable for {}, trying next strategy", kind, url);
                    fallback.get_or_insert(html);
                }
                Err(e) => {
                    self.metrics.record_failure(kind.as_str(), &e);
                    failures.push((kind, e));
                }
            }
        }
        finish(url, fallback, failures)
    }

    async fn fetch_bytes(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let candidates = self.candidates(ResourceClass::Image);
        if candidates.is_empty() {
            return Err(self.disabled(ResourceClass::Image, url));
        }

        let mut failures = Vec::new();
        for backend in candidates {
            let kind = backend.kind();
            let start = Instant::now();
            match backend.fetch_bytes(url, referer).await {
                Ok(bytes) => {
                    self.metrics.record_success(kind.as_str(), start.elapsed());
                    return Ok(bytes);
                }
                Err(e) => {
                    self.metrics.record_failure(kind.as_str(), &e);
                    failures.push((kind, e));
                }
            }
        }
        finish(url, None, failures)
    }

    fn images_via_proxy(&self) -> bool {
        self.candidates(ResourceClass::Image)
            .first()
            .map(|b| b.kind() == StrategyKind::Proxy)
            .unwrap_or(false)
    }
}
