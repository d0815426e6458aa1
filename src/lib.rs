// Library interface for webtoon_scraper
// The binary and the integration tests both build on these modules

pub mod api;
pub mod app_state;
pub mod browser_client;
pub mod config;
pub mod db;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod helpers;
pub mod http_client;
pub mod job;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod proxy_client;
pub mod rate_limiter;
pub mod scheduler;
