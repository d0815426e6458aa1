mod support;

use std::sync::Arc;
use support::{Response, TestServer};
use webtoon_scraper::config::{ProxyConfig, StrategyConfig};
use webtoon_scraper::error::FetchError;
use webtoon_scraper::extractor::extract_chapter_links;
use webtoon_scraper::fetcher::{Backend, PageFetcher, ResourceClass, StrategyChain, StrategyChoice};
use webtoon_scraper::http_client::DirectClient;
use webtoon_scraper::metrics::MetricsTracker;
use webtoon_scraper::proxy_client::ProxyClient;

const LISTING: &str = r#"<html><body><h1>Demo</h1><ul class="main version-chap">
<li class="wp-manga-chapter"><a href="/manga/demo/chapter-2/">Chapter 2</a></li>
<li class="wp-manga-chapter"><a href="/manga/demo/chapter-1/">Chapter 1</a></li>
</ul></body></html>"#;

/// Direct answers on `/manga/...`, the proxy on `/v1/`
fn chain(server: &TestServer, metrics: Arc<MetricsTracker>) -> StrategyChain {
    let proxy = ProxyClient::new(ProxyConfig {
        endpoint: server.url("/v1/"),
        api_key: "k".to_string(),
        qps: 50.0,
        max_retries: 2,
        backoff_base_ms: 5,
        backoff_cap_ms: 10,
        timeout_secs: 5,
        ..ProxyConfig::default()
    })
    .unwrap();
    StrategyChain::new(
        vec![Backend::Direct(DirectClient::new().unwrap()), Backend::Proxy(proxy)],
        StrategyConfig::default(),
        metrics,
    )
}

#[tokio::test]
async fn test_auto_falls_back_when_direct_is_blocked() {
    let server = TestServer::start(|req, _| match req.path() {
        "/manga/demo/" => Response::status(403),
        "/v1/" => Response::html(LISTING),
        _ => Response::status(404),
    })
    .await;
    let metrics = Arc::new(MetricsTracker::new());
    let chain = chain(&server, metrics.clone());
    let url = server.url("/manga/demo/");

    let accept = |html: &str| !extract_chapter_links(html, &url).is_empty();
    let html = chain.fetch_html(&url, ResourceClass::Series, &accept).await.unwrap();
    assert!(html.contains("chapter-2"));

    assert_eq!(metrics.get_metrics("direct").unwrap().failed_requests, 1);
    assert_eq!(metrics.get_metrics("proxy").unwrap().successful_requests, 1);
}

#[tokio::test]
async fn test_auto_moves_on_from_a_page_without_chapters() {
    let server = TestServer::start(|req, _| match req.path() {
        // challenge page: 200 but nothing to extract
        "/manga/demo/" => Response::html("<html><body>Just a moment...</body></html>"),
        "/v1/" => Response::html(LISTING),
        _ => Response::status(404),
    })
    .await;
    let chain = chain(&server, Arc::new(MetricsTracker::new()));
    let url = server.url("/manga/demo/");

    let accept = |html: &str| !extract_chapter_links(html, &url).is_empty();
    let html = chain.fetch_html(&url, ResourceClass::Series, &accept).await.unwrap();
    assert!(html.contains("version-chap"));
    assert_eq!(server.hits("/v1/"), 1);
}

#[tokio::test]
async fn test_unaccepted_page_is_returned_when_nothing_better_exists() {
    let server = TestServer::start(|req, _| match req.path() {
        "/manga/demo/" => Response::html("<html><body>empty</body></html>"),
        _ => Response::status(500),
    })
    .await;
    let chain = chain(&server, Arc::new(MetricsTracker::new()));
    let url = server.url("/manga/demo/");

    let html = chain
        .fetch_html(&url, ResourceClass::Series, &|_: &str| false)
        .await
        .unwrap();
    assert!(html.contains("empty"));
}

#[tokio::test]
async fn test_all_strategies_failing_reports_each_one() {
    let server = TestServer::start(|_, _| Response::status(503)).await;
    let chain = chain(&server, Arc::new(MetricsTracker::new()));
    let url = server.url("/manga/demo/chapter-1/");

    let err = chain
        .fetch_html(&url, ResourceClass::Chapter, &|_: &str| true)
        .await
        .unwrap_err();
    match &err {
        FetchError::AllStrategiesFailed { url: failed, errors } => {
            assert_eq!(failed, &url);
            assert_eq!(errors.len(), 2);
            assert!(errors[0].starts_with("direct:"));
            assert!(errors[1].starts_with("proxy:"));
        }
        other => panic!("expected every strategy to fail, got {:?}", other),
    }
    assert!(err.to_string().contains(&url));
}

#[tokio::test]
async fn test_images_use_the_fixed_direct_strategy_with_referer() {
    let server = TestServer::start(|req, _| match req.path() {
        "/img/001.png" => Response::bytes(b"png"),
        _ => Response::status(404),
    })
    .await;
    let chain = chain(&server, Arc::new(MetricsTracker::new()));
    assert!(!chain.images_via_proxy());

    let bytes = chain
        .fetch_bytes(&server.url("/img/001.png"), Some("https://site.test/chapter-1/"))
        .await
        .unwrap();
    assert_eq!(bytes, b"png");
    assert_eq!(server.hits("/v1/"), 0);
    assert_eq!(server.requests()[0].header("referer"), Some("https://site.test/chapter-1/"));
}

#[tokio::test]
async fn test_images_through_proxy_when_configured() {
    let server = TestServer::start(|req, _| match req.path() {
        "/v1/" => Response::bytes(b"via-proxy"),
        _ => Response::status(404),
    })
    .await;
    let metrics = Arc::new(MetricsTracker::new());
    let proxy = ProxyClient::new(ProxyConfig {
        endpoint: server.url("/v1/"),
        api_key: "k".to_string(),
        qps: 50.0,
        ..ProxyConfig::default()
    })
    .unwrap();
    let chain = StrategyChain::new(
        vec![Backend::Direct(DirectClient::new().unwrap()), Backend::Proxy(proxy)],
        StrategyConfig {
            images: StrategyChoice::Proxy,
            ..StrategyConfig::default()
        },
        metrics,
    );

    assert!(chain.images_via_proxy());
    let bytes = chain.fetch_bytes("https://cdn.test/001.jpg", None).await.unwrap();
    assert_eq!(bytes, b"via-proxy");
    assert_eq!(
        server.requests()[0].query("url").as_deref(),
        Some("https://cdn.test/001.jpg")
    );
}
