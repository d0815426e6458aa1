use crate::config::FetchConfig;
use crate::error::FetchError;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, ClientBuilder, Response};
use std::time::Duration;

/// User agents to rotate through to avoid bot detection
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// Configuration for the direct HTTP strategy
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub enable_cookies: bool,
    pub enable_compression: bool,
    /// Rotation pool; the built-in list is used when empty
    pub user_agents: Vec<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            enable_cookies: true,
            enable_compression: true,
            user_agents: Vec::new(),
        }
    }
}

impl From<&FetchConfig> for HttpClientConfig {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            enable_cookies: cfg.enable_cookies,
            enable_compression: cfg.enable_compression,
            user_agents: cfg.user_agents.clone(),
        }
    }
}

/// Plain HTTP GET with a browser-like header set.
///
/// No retry happens here: a non-2xx status or a transport failure is
/// returned to the caller as a [`FetchError`].
pub struct DirectClient {
    client: Client,
    config: HttpClientConfig,
}

impl DirectClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        // Add default headers that mimic a real browser
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
        headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .cookie_store(config.enable_cookies)
            .gzip(config.enable_compression)
            .brotli(config.enable_compression)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    /// Pick a user agent from the configured pool
    fn random_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        if self.config.user_agents.is_empty() {
            USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())].to_string()
        } else {
            let idx = rng.gen_range(0..self.config.user_agents.len());
            self.config.user_agents[idx].clone()
        }
    }

    async fn send(&self, url: &str, accept: &'static str, referer: Option<&str>) -> Result<Response, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .header(ACCEPT, accept);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            log::debug!("Direct fetch of {} answered {}", url, status);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Fetch a page and return its body as text
    pub async fn get_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self.send(url, HTML_ACCEPT, None).await?;
        response.text().await.map_err(|e| FetchError::transport(url, e))
    }

    /// Fetch binary content, sending `referer` when given
    pub async fn get_bytes(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let response = self.send(url, IMAGE_ACCEPT, referer).await?;
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

    #[tokio::test]
    async fn test_client_creation() {
        let client = DirectClient::new();
        assert!(client.is_ok());
    }

    #[test]
    fn test_random_user_agent_uses_builtin_pool() {
        let client = DirectClient::new().unwrap();
        let ua = client.random_user_agent();
        assert!(USER_AGENTS.contains(&ua.as_str()));
    }

    #[test]
    fn test_random_user_agent_uses_configured_pool() {
        let client = DirectClient::with_config(HttpClientConfig {
            user_agents: vec!["TestAgent/1.0".to_string()],
            ..HttpClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.random_user_agent(), "TestAgent/1.0");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let client = DirectClient::with_config(HttpClientConfig {
            timeout: Duration::from_millis(500),
            ..HttpClientConfig::default()
        })
        .unwrap();
        // port 9 (discard) on localhost is closed on test machines
        let err = client.get_html("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert!(err.to_string().contains("http://127.0.0.1:9/"));
        assert!(err.is_transient());
    }
}
