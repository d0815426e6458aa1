use crate::fetcher::{StrategyChoice, StrategyKind};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub strategies: StrategyConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// First port to try
    #[serde(default = "default_port")]
    pub port: u16,
    /// Last port to try when earlier ones are taken
    #[serde(default = "default_port_max")]
    pub port_max: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Root every stored image path is relative to
    #[serde(default = "default_media_root")]
    pub media_root: String,
    #[serde(default = "default_media_subdir")]
    pub media_subdir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Timeout for direct HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Enable cookie support on the direct client
    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// User agents rotated by the direct strategy; empty uses the built-in pool
    #[serde(default)]
    pub user_agents: Vec<String>,

    /// Enable headless browser for JavaScript-rendered sites
    #[serde(default = "default_false")]
    pub enable_browser: bool,

    /// Browser headless mode
    #[serde(default = "default_true")]
    pub browser_headless: bool,

    /// Browser timeout in seconds
    #[serde(default = "default_browser_timeout")]
    pub browser_timeout_secs: u64,

    /// Number of scroll steps used to trigger lazy content
    #[serde(default = "default_scroll_steps")]
    pub browser_scroll_steps: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_endpoint")]
    pub endpoint: String,
    /// Overridden by SCRAPEOPS_API_KEY when set
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_false")]
    pub render_js: bool,
    /// Maximum requests per second sent to the proxy
    #[serde(default = "default_qps")]
    pub qps: f64,
    #[serde(default = "default_proxy_retries")]
    pub max_retries: usize,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default)]
    pub series: StrategyChoice,
    #[serde(default)]
    pub chapters: StrategyChoice,
    #[serde(default = "default_image_choice")]
    pub images: StrategyChoice,
    /// Order tried by `auto`, cheapest first
    #[serde(default = "default_priority")]
    pub priority: Vec<StrategyKind>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Ceiling applied when images go through the proxy
    #[serde(default = "default_proxy_cap")]
    pub proxy_concurrency_cap: usize,
    #[serde(default = "default_attempts")]
    pub attempts: usize,
    /// Optional throttle for direct image fetches
    #[serde(default)]
    pub direct_qps: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// 0 runs every job on its own thread instead of a queue
    #[serde(default = "default_workers")]
    pub count: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccessConfig {
    /// Owners granted the scraper feature; empty grants everyone
    #[serde(default)]
    pub scraper_owners: Vec<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
    #[serde(default = "default_history_max")]
    pub max_limit: usize,
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_port_max() -> u16 { 8090 }
fn default_database_path() -> String { "scraper.db".to_string() }
fn default_media_root() -> String { "media".to_string() }
fn default_media_subdir() -> String { "webtoons".to_string() }
fn default_timeout() -> u64 { 15 }
fn default_browser_timeout() -> u64 { 30 }
fn default_scroll_steps() -> u32 { 14 }
fn default_proxy_endpoint() -> String { "https://proxy.scrapeops.io/v1/".to_string() }
fn default_country() -> String { "fr".to_string() }
fn default_qps() -> f64 { 1.0 }
fn default_proxy_retries() -> usize { 6 }
fn default_backoff_base() -> u64 { 1000 }
fn default_backoff_multiplier() -> f64 { 1.8 }
fn default_backoff_cap() -> u64 { 15_000 }
fn default_proxy_timeout() -> u64 { 180 }
fn default_image_choice() -> StrategyChoice { StrategyChoice::Direct }
fn default_priority() -> Vec<StrategyKind> {
    vec![StrategyKind::Direct, StrategyKind::Proxy, StrategyKind::Browser]
}
fn default_concurrency() -> usize { 8 }
fn default_proxy_cap() -> usize { 3 }
fn default_attempts() -> usize { 3 }
fn default_workers() -> usize { 2 }
fn default_history_limit() -> usize { 20 }
fn default_history_max() -> usize { 100 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_max: default_port_max(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            media_root: default_media_root(),
            media_subdir: default_media_subdir(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            enable_cookies: true,
            enable_compression: true,
            user_agents: Vec::new(),
            enable_browser: false, // requires Chrome
            browser_headless: true,
            browser_timeout_secs: default_browser_timeout(),
            browser_scroll_steps: default_scroll_steps(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoint: default_proxy_endpoint(),
            api_key: String::new(),
            country: default_country(),
            render_js: false,
            qps: default_qps(),
            max_retries: default_proxy_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_cap_ms: default_backoff_cap(),
            timeout_secs: default_proxy_timeout(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            series: StrategyChoice::Auto,
            chapters: StrategyChoice::Auto,
            images: default_image_choice(),
            priority: default_priority(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            proxy_concurrency_cap: default_proxy_cap(),
            attempts: default_attempts(),
            direct_qps: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: default_workers() }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Self {
        let mut cfg = Self::default();
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<Config>(&content) {
                    Ok(parsed) => cfg = parsed,
                    Err(e) => log::warn!("Ignoring invalid {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("Could not read {}: {}", path.display(), e),
            }
        }
        if let Ok(key) = std::env::var("SCRAPEOPS_API_KEY") {
            if !key.trim().is_empty() {
                cfg.proxy.api_key = key.trim().to_string();
            }
        }
        cfg
    }

    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.media_root)
    }

    /// Owners allowed to submit jobs, `None` when unrestricted
    pub fn scraper_owners(&self) -> Option<HashSet<i64>> {
        if self.access.scraper_owners.is_empty() {
            None
        } else {
            Some(self.access.scraper_owners.iter().copied().collect())
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_timeout_secs)
    }
}

impl ProxyConfig {
    /// The proxy is usable only with an API key
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.download.concurrency, 8);
        assert_eq!(cfg.download.proxy_concurrency_cap, 3);
        assert_eq!(cfg.proxy.backoff_base_ms, 1000);
        assert_eq!(cfg.proxy.backoff_cap_ms, 15_000);
        assert_eq!(cfg.strategies.series, StrategyChoice::Auto);
        assert_eq!(cfg.strategies.images, StrategyChoice::Direct);
        assert_eq!(cfg.strategies.priority[0], StrategyKind::Direct);
        assert!(cfg.scraper_owners().is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
[storage]
media_root = "/srv/media"

[strategies]
series = "browser"
priority = ["proxy", "direct"]

[access]
scraper_owners = [1, 7]
"#
        )
        .unwrap();

        let cfg = Config::load_from(&path);
        assert_eq!(cfg.storage.media_root, "/srv/media");
        assert_eq!(cfg.storage.media_subdir, "webtoons");
        assert_eq!(cfg.strategies.series, StrategyChoice::Browser);
        assert_eq!(cfg.strategies.chapters, StrategyChoice::Auto);
        assert_eq!(cfg.strategies.priority, vec![StrategyKind::Proxy, StrategyKind::Direct]);
        assert!(cfg.scraper_owners().unwrap().contains(&7));
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        let cfg = Config::load_from(&path);
        assert_eq!(cfg.download.attempts, 3);
    }
}
