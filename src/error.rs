//! Error types for the scrape pipeline
//!
//! `FetchError` covers every fetch strategy and is recovered by the fallback
//! chain or by per-strategy retry. `ScrapeError` is what reaches the
//! orchestrator boundary, where it becomes a `failed` job.

use std::time::Duration;

/// Errors raised by any fetch strategy
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Request failed for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Proxy gave up on {url} after {attempts} attempts (last status: {last_status:?})")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last_status: Option<u16>,
    },

    #[error("Browser failed on {url}: {message}")]
    Browser { url: String, message: String },

    #[error("Strategy '{strategy}' is not enabled (needed for {url})")]
    Disabled { strategy: String, url: String },

    #[error("All strategies failed for {url}: {}", .errors.join("; "))]
    AllStrategiesFailed { url: String, errors: Vec<String> },

    #[error("Fetch task for {url} was aborted: {message}")]
    Aborted { url: String, message: String },
}

impl FetchError {
    /// Transport failures, 5xx and 429 are worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Build a transport error, keeping the URL in the message
    pub fn transport(url: &str, source: reqwest::Error) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// True when the error came from a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transport { source, .. } if source.is_timeout())
    }
}

/// Errors that end a scrape job or reject a request
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found")]
    NotFound,

    #[error("cancelled by request")]
    Cancelled,

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Transition(#[from] crate::job::InvalidTransition),
}

/// How long a 429 asked us to wait, if it said so
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let secs: f64 = value?.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
