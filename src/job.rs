//! Scrape job lifecycle
//!
//! `pending → running → success | failed`. Every status change goes through
//! [`ScrapeJob::apply`], which is the only place `finished_at` is written, so
//! `finished_at` is set exactly when the status is terminal.

use crate::helpers::format_duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Events that move a job between states
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Start,
    Succeed { message: String },
    Fail { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition from {from} on {event}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub event: &'static str,
}

/// Transition table
pub fn next_status(from: JobStatus, event: &JobEvent) -> Result<JobStatus, InvalidTransition> {
    match (from, event) {
        (JobStatus::Pending, JobEvent::Start) => Ok(JobStatus::Running),
        (JobStatus::Running, JobEvent::Succeed { .. }) => Ok(JobStatus::Success),
        (JobStatus::Running, JobEvent::Fail { .. }) => Ok(JobStatus::Failed),
        // a job can be abandoned before a worker ever picked it up
        (JobStatus::Pending, JobEvent::Fail { .. }) => Ok(JobStatus::Failed),
        (from, event) => Err(InvalidTransition {
            from,
            event: match event {
                JobEvent::Start => "start",
                JobEvent::Succeed { .. } => "succeed",
                JobEvent::Fail { .. } => "fail",
            },
        }),
    }
}

/// The externally visible unit of work
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScrapeJob {
    pub id: i64,
    pub owner_id: i64,
    pub source_url: String,
    pub status: JobStatus,
    pub message: String,
    pub series_id: Option<i64>,
    pub chapters_scraped: u32,
    pub images_downloaded: u32,
    /// Series folder relative to the media root
    pub media_root: String,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScrapeJob {
    /// A fresh pending job, not yet stored
    pub fn pending(owner_id: i64, source_url: &str, now: i64) -> Self {
        Self {
            id: 0,
            owner_id,
            source_url: source_url.to_string(),
            status: JobStatus::Pending,
            message: String::new(),
            series_id: None,
            chapters_scraped: 0,
            images_downloaded: 0,
            media_root: String::new(),
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle event
    pub fn apply(&mut self, event: JobEvent, now: i64) -> Result<(), InvalidTransition> {
        let next = next_status(self.status, &event)?;
        match event {
            JobEvent::Start => {
                self.started_at = Some(now);
                self.message.clear();
            }
            JobEvent::Succeed { message } | JobEvent::Fail { message } => {
                self.message = message;
                self.finished_at = Some(now);
            }
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Count one persisted chapter and its images
    pub fn record_chapter(&mut self, images: usize, now: i64) {
        self.chapters_scraped = self.chapters_scraped.saturating_add(1);
        self.images_downloaded = self
            .images_downloaded
            .saturating_add(u32::try_from(images).unwrap_or(u32::MAX));
        self.updated_at = now;
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Job as returned to the submitter
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobView {
    pub id: i64,
    pub url: String,
    pub status: JobStatus,
    pub message: String,
    pub series_id: Option<i64>,
    pub series_title: Option<String>,
    pub chapters_scraped: u32,
    pub images_downloaded: u32,
    pub media_root: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub duration: Option<String>,
}

impl JobView {
    pub fn new(job: &ScrapeJob, series_title: Option<String>) -> Self {
        Self {
            id: job.id,
            url: job.source_url.clone(),
            status: job.status,
            message: job.message.clone(),
            series_id: job.series_id,
            series_title,
            chapters_scraped: job.chapters_scraped,
            images_downloaded: job.images_downloaded,
            media_root: job.media_root.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            duration: job.duration_seconds().map(format_duration),
        }
    }
}
