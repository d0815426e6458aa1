//! Concurrent image download for one chapter
//!
//! Every URL gets its 1-based sequence index before dispatch, so
//! `NNN.<ext>` names follow source order whatever order completions arrive
//! in. In-flight downloads are bounded by a semaphore and, when given, by a
//! shared rate limiter. A permanently failing image is recorded and skipped.

use crate::fetcher::PageFetcher;
use crate::helpers::image_file_name;
use crate::rate_limiter::RateLimiter;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone, Debug)]
pub struct DownloadOptions {
    pub concurrency: usize,
    /// Tries per image, transient errors only are retried
    pub attempts: usize,
    /// Sent with direct image requests
    pub referer: Option<String>,
    pub limiter: Option<Arc<RateLimiter>>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            attempts: 3,
            referer: None,
            limiter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadFailure {
    /// 1-based position in the chapter
    pub index: usize,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DownloadReport {
    /// Stored paths relative to the media root, in source order
    pub stored: Vec<String>,
    pub failures: Vec<DownloadFailure>,
}

/// Remove `dir` and everything in it; a missing directory is fine
pub async fn remove_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove whatever a previous run left in `dir` and recreate it
pub async fn prepare_dir(dir: &Path) -> std::io::Result<()> {
    remove_dir(dir).await?;
    tokio::fs::create_dir_all(dir).await
}

/// Replace `dir` with the finished `staging` directory
pub async fn promote_dir(staging: &Path, dir: &Path) -> std::io::Result<()> {
    remove_dir(dir).await?;
    tokio::fs::rename(staging, dir).await
}

/// Download `urls` into `media_root/relative_dir`
pub async fn download_all(
    fetcher: &dyn PageFetcher,
    urls: &[String],
    media_root: &Path,
    relative_dir: &str,
    options: &DownloadOptions,
) -> std::io::Result<DownloadReport> {
    let dest = media_root.join(relative_dir);
    tokio::fs::create_dir_all(&dest).await?;

    let semaphore = Semaphore::new(options.concurrency.max(1));
    let semaphore = &semaphore;
    let dest = &dest;

    let tasks = urls.iter().enumerate().map(|(i, url)| async move {
        let index = i + 1;
        let file_name = image_file_name(index, url);
        let outcome = match semaphore.acquire().await {
            Ok(_permit) => download_one(fetcher, url, dest.join(&file_name), options).await,
            Err(e) => Err(e.to_string()),
        };
        (index, url, file_name, outcome)
    });

    let mut report = DownloadReport::default();
    for (index, url, file_name, outcome) in join_all(tasks).await {
        match outcome {
            Ok(()) => report.stored.push(format!("{}/{}", relative_dir, file_name)),
            Err(error) => {
                log::warn!("Image {} skipped ({}): {}", index, url, error);
                report.failures.push(DownloadFailure {
                    index,
                    url: url.clone(),
                    error,
                });
            }
        }
    }
    Ok(report)
}

async fn download_one(
    fetcher: &dyn PageFetcher,
    url: &str,
    path: PathBuf,
    options: &DownloadOptions,
) -> Result<(), String> {
    let attempts = options.attempts.max(1);
    let mut attempt = 0;
    let bytes = loop {
        attempt += 1;
        if let Some(limiter) = &options.limiter {
            limiter.wait().await;
        }
        match fetcher.fetch_bytes(url, options.referer.as_deref()).await {
            Ok(bytes) => break bytes,
            Err(e) if e.is_transient() && attempt < attempts => {
                log::debug!("Retrying {} ({}/{}): {}", url, attempt, attempts, e);
            }
            Err(e) => return Err(e.to_string()),
        }
    };

    if bytes.is_empty() {
        return Err(format!("empty body for {}", url));
    }
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| format!("cannot write {}: {}", path.display(), e))
}
