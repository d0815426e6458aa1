use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::fetcher::ResourceClass;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration for headless browser
#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub timeout: Duration,
    /// Scroll steps used to trigger lazy content
    pub scroll_steps: u32,
    pub scroll_pause: Duration,
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            timeout: Duration::from_secs(30),
            scroll_steps: 14,
            scroll_pause: Duration::from_millis(250),
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
            ),
        }
    }
}

impl From<&FetchConfig> for BrowserConfig {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            headless: cfg.browser_headless,
            timeout: cfg.browser_timeout(),
            scroll_steps: cfg.browser_scroll_steps,
            ..Self::default()
        }
    }
}

// Override navigator properties to avoid detection
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['fr-FR', 'fr', 'en-US', 'en'] });
"#;

// Open the chapter tab, accept cookie banners, keep pressing "load more"
const LISTING_SCRIPT: &str = r#"
    (() => {
      const tab = document.querySelector("[data-tab='manga-chapters-holder'], a[href*='#manga-chapters-holder']");
      if (tab) { try { tab.click(); } catch (e) {} }
      const clickAll = (sel) => document.querySelectorAll(sel).forEach(b => { try { b.click(); } catch (e) {} });
      clickAll('[aria-label*="Accept"], [aria-label*="Accepter"], button.cookie, .cky-btn-accept, .cm-btn-inverted, .fc-cta-consent');
      let i = 0;
      const tryLoadMore = () => {
        clickAll('.btn-load-chapters, .load-more, button[aria-label*="more"], a[aria-label*="more"]');
        if (++i < 20) setTimeout(tryLoadMore, 600);
      };
      tryLoadMore();
    })();
"#;

// Promote deferred image sources to src
const LAZY_IMAGES_SCRIPT: &str = r#"
    (() => {
      document.querySelectorAll('img[loading], img[data-src], img[data-lazy-src], img[data-original], img[data-cfsrc]')
        .forEach(img => {
          try {
            img.loading = 'eager';
            img.decoding = 'sync';
            if (img.dataset) {
              img.src = img.dataset.src || img.dataset.lazySrc || img.dataset.original || img.dataset.cfsrc || img.src;
            }
          } catch (e) {}
        });
    })();
"#;

const SCROLL_SCRIPT: &str = "window.scrollBy(0, 800);";

/// Headless Chrome strategy for JavaScript-rendered pages.
///
/// Chrome is launched on first use and reused afterwards. All methods block;
/// use [`BrowserClient::fetch_html`] from async code.
pub struct BrowserClient {
    browser: Mutex<Option<Browser>>,
    config: BrowserConfig,
}

impl BrowserClient {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            browser: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    fn launch(&self) -> Result<Browser, String> {
        let user_agent_arg = self
            .config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-setuid-sandbox"),
        ];
        if let Some(ref ua) = user_agent_arg {
            args.push(OsStr::new(ua));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .window_size(Some((self.config.window_width, self.config.window_height)))
            .idle_browser_timeout(self.config.timeout.max(Duration::from_secs(60)))
            .args(args)
            .build()
            .map_err(|e| format!("invalid launch options: {}", e))?;

        log::info!("Launching headless browser (headless: {})", self.config.headless);
        Browser::new(launch_options).map_err(|e| format!("launch failed: {}", e))
    }

    fn new_tab(&self) -> Result<Arc<Tab>, String> {
        let mut guard = self.browser.lock().map_err(|_| "browser lock poisoned".to_string())?;
        if guard.is_none() {
            *guard = Some(self.launch()?);
        }
        let browser = guard.as_ref().ok_or_else(|| "browser unavailable".to_string())?;
        match browser.new_tab() {
            Ok(tab) => Ok(tab),
            Err(e) => {
                // The process probably died; relaunch next time
                *guard = None;
                Err(format!("tab creation failed: {}", e))
            }
        }
    }

    fn render_in_tab(&self, tab: &Tab, url: &str, class: ResourceClass) -> Result<String, String> {
        tab.set_default_timeout(self.config.timeout);
        tab.navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| format!("navigation failed: {}", e))?;
        tab.wait_for_element("body")
            .map_err(|e| format!("page never rendered: {}", e))?;

        if let Err(e) = tab.evaluate(STEALTH_SCRIPT, false) {
            log::debug!("Stealth script failed on {}: {}", url, e);
        }

        let heuristics = match class {
            ResourceClass::Series => LISTING_SCRIPT,
            ResourceClass::Chapter | ResourceClass::Image => LAZY_IMAGES_SCRIPT,
        };
        if let Err(e) = tab.evaluate(heuristics, false) {
            log::debug!("Heuristics script failed on {}: {}", url, e);
        }

        for _ in 0..self.config.scroll_steps {
            if tab.evaluate(SCROLL_SCRIPT, false).is_err() {
                break;
            }
            std::thread::sleep(self.config.scroll_pause);
        }

        // Images revealed by scrolling still carry their lazy attributes
        if class == ResourceClass::Chapter {
            let _ = tab.evaluate(LAZY_IMAGES_SCRIPT, false);
        }

        tab.get_content().map_err(|e| format!("could not read DOM: {}", e))
    }

    /// Load `url`, run the heuristics for `class` and return the rendered DOM
    pub fn render(&self, url: &str, class: ResourceClass) -> Result<String, FetchError> {
        log::info!("Browser navigating to: {}", url);
        let browser_err = |message: String| FetchError::Browser {
            url: url.to_string(),
            message,
        };

        let tab = self.new_tab().map_err(browser_err)?;
        let result = self.render_in_tab(&tab, url, class);
        if let Err(e) = tab.close(true) {
            log::debug!("Closing tab for {} failed: {}", url, e);
        }
        result.map_err(browser_err)
    }

    /// Async wrapper running [`BrowserClient::render`] on the blocking pool
    pub async fn fetch_html(self: &Arc<Self>, url: &str, class: ResourceClass) -> Result<String, FetchError> {
        let client = Arc::clone(self);
        let owned_url = url.to_string();
        tokio::task::spawn_blocking(move || client.render(&owned_url, class))
            .await
            .map_err(|e| FetchError::Aborted {
                url: url.to_string(),
                message: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_config_from_fetch_config() {
        let fetch = FetchConfig {
            browser_headless: false,
            browser_timeout_secs: 12,
            browser_scroll_steps: 3,
            ..FetchConfig::default()
        };
        let config = BrowserConfig::from(&fetch);
        assert!(!config.headless);
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.scroll_steps, 3);
        assert_eq!(config.window_width, 1920);
    }

    #[test]
    fn test_listing_script_keeps_the_chapter_tab_selector() {
        assert!(LISTING_SCRIPT.contains("a[href*='#manga-chapters-holder']"));
        assert!(LISTING_SCRIPT.trim_end().ends_with("})();"));
        assert!(LISTING_SCRIPT.contains("tryLoadMore();"));
    }

    #[test]
    fn test_client_is_lazy() {
        // no Chrome needed until the first render
        let client = BrowserClient::new(BrowserConfig::default());
        assert!(client.browser.lock().unwrap().is_none());
    }

    #[test]
    #[ignore] // Ignore by default as it requires Chrome/Chromium and internet
    fn test_simple_navigation() {
        let client = BrowserClient::new(BrowserConfig {
            scroll_steps: 1,
            ..BrowserConfig::default()
        });
        let html = client.render("https://example.com", ResourceClass::Series).unwrap();
        assert!(html.contains("Example Domain"));
    }
}
