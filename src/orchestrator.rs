//! End-to-end run of one scrape job.
//!
//! listing page → series upsert → for each chapter, oldest first: reader
//! page → images → download → chapter upsert. Every chapter is written as
//! soon as it completes, so a failure later in the run keeps earlier work.

use crate::config::Config;
use crate::db::{self, with_conn, Db};
use crate::downloader::{download_all, prepare_dir, promote_dir, remove_dir, DownloadOptions};
use crate::error::ScrapeError;
use crate::extractor::{extract_chapter_entries, extract_chapter_links, extract_images, extract_series_metadata};
use crate::fetcher::{PageFetcher, ResourceClass};
use crate::helpers::{chapter_folder_name, chapter_number_from_text, chapter_number_from_url, slugify};
use crate::job::{JobEvent, JobStatus, ScrapeJob};
use crate::models::{ChapterDefaults, ChapterLink, ScrapeOutput, ScrapedChapter, Series, SeriesDefaults};
use crate::rate_limiter::RateLimiter;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Series folder under the media subdir; the id keeps titles with the same
/// slug apart
fn series_folder(media_subdir: &str, series: &Series) -> String {
    format!("{}/{}-{}", media_subdir, slugify(&series.title), series.id)
}

/// Give every listed chapter a unique number, in ascending order.
///
/// Numbers come from the URL, then the link text. Entries with neither are
/// numbered after the highest parsed one, in listing order, so they never
/// take the place of a real chapter. Later entries repeating a number are
/// dropped.
fn number_chapters(links: Vec<ChapterLink>) -> Vec<ScrapedChapter> {
    let parsed: Vec<Option<u32>> = links
        .iter()
        .map(|link| chapter_number_from_url(&link.url).or_else(|| chapter_number_from_text(&link.title)))
        .collect();
    let mut next = parsed.iter().flatten().max().map_or(1, |max| max.saturating_add(1));

    let mut seen = HashSet::new();
    let mut chapters = Vec::with_capacity(links.len());
    for (link, number) in links.into_iter().zip(parsed) {
        let chapter_number = match number {
            Some(n) => n,
            None => {
                let n = next;
                next = next.saturating_add(1);
                n
            }
        };
        if !seen.insert(chapter_number) {
            log::warn!("Chapter {} listed twice, ignoring {}", chapter_number, link.url);
            continue;
        }
        let title = if link.title.is_empty() {
            format!("Chapter {}", chapter_number)
        } else {
            link.title
        };
        chapters.push(ScrapedChapter {
            title,
            chapter_number,
            source_url: link.url,
            images: Vec::new(),
            release_date: link.release_date,
        });
    }
    chapters.sort_by_key(|c| c.chapter_number);
    chapters
}

/// Cooperative cancellation flag shared between the API and a running job
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ScrapeError> {
        if self.is_cancelled() {
            Err(ScrapeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Storage and download settings used by a run
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub media_root: PathBuf,
    pub media_subdir: String,
    pub concurrency: usize,
    pub proxy_concurrency_cap: usize,
    pub attempts: usize,
}

impl From<&Config> for PipelineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            media_root: cfg.media_root(),
            media_subdir: cfg.storage.media_subdir.clone(),
            concurrency: cfg.download.concurrency,
            proxy_concurrency_cap: cfg.download.proxy_concurrency_cap,
            attempts: cfg.download.attempts,
        }
    }
}

/// What a run did besides the job counters
#[derive(Debug, Default)]
struct RunSummary {
    chapters: u32,
    skipped: Vec<u32>,
    failed_images: usize,
}

impl RunSummary {
    fn message(&self) -> String {
        let mut message = format!("{} chapters imported.", self.chapters);
        if !self.skipped.is_empty() {
            let list: Vec<String> = self.skipped.iter().map(u32::to_string).collect();
            message.push_str(&format!(
                " {} skipped without images ({}).",
                self.skipped.len(),
                list.join(", ")
            ));
        }
        if self.failed_images > 0 {
            message.push_str(&format!(" {} images failed to download.", self.failed_images));
        }
        message
    }
}

pub struct Orchestrator {
    db: Db,
    fetcher: Arc<dyn PageFetcher>,
    settings: PipelineSettings,
    /// Throttle for direct image fetches
    image_limiter: Option<Arc<RateLimiter>>,
}

impl Orchestrator {
    pub fn new(db: Db, fetcher: Arc<dyn PageFetcher>, settings: PipelineSettings) -> Self {
        Self {
            db,
            fetcher,
            settings,
            image_limiter: None,
        }
    }

    pub fn with_image_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.image_limiter = Some(limiter);
        self
    }

    fn save(&self, job: &ScrapeJob) -> Result<(), ScrapeError> {
        with_conn(&self.db, |c| db::save_job(c, job))
    }

    fn apply(&self, job: &mut ScrapeJob, event: JobEvent) -> Result<(), ScrapeError> {
        job.apply(event, now())?;
        self.save(job)
    }

    /// Drive job `job_id` to a terminal state and return it.
    ///
    /// Errors during the run end the job as `failed`; only a missing job or
    /// a storage failure while recording the outcome is returned as `Err`.
    pub async fn run(&self, job_id: i64, cancel: &CancelToken) -> Result<ScrapeJob, ScrapeError> {
        let mut job = with_conn(&self.db, |c| db::get_job(c, job_id))?.ok_or(ScrapeError::NotFound)?;
        if job.status != JobStatus::Pending {
            log::warn!("Job {} is {}, not running it again", job.id, job.status);
            return Ok(job);
        }

        if cancel.is_cancelled() {
            log::info!("Job {} cancelled before it started", job.id);
            self.apply(&mut job, JobEvent::Fail { message: ScrapeError::Cancelled.to_string() })?;
            return Ok(job);
        }

        self.apply(&mut job, JobEvent::Start)?;
        log::info!("Job {} running for {}", job.id, job.source_url);

        let event = match self.execute(&mut job, cancel).await {
            Ok(summary) => {
                let message = summary.message();
                log::info!("Job {} succeeded: {}", job.id, message);
                JobEvent::Succeed { message }
            }
            Err(e) => {
                log::error!("Job {} failed for {}: {}", job.id, job.source_url, e);
                JobEvent::Fail { message: e.to_string() }
            }
        };
        self.apply(&mut job, event)?;
        Ok(job)
    }

    async fn resolve_listing(&self, url: &str) -> Result<ScrapeOutput, ScrapeError> {
        let accept = |html: &str| !extract_chapter_links(html, url).is_empty();
        let html = self.fetcher.fetch_html(url, ResourceClass::Series, &accept).await?;

        let meta = extract_series_metadata(&html, url);
        let chapters = number_chapters(extract_chapter_entries(&html, url));

        Ok(ScrapeOutput {
            series_title: meta.title,
            cover_image_url: meta.cover_image_url,
            chapters,
        })
    }

    async fn execute(&self, job: &mut ScrapeJob, cancel: &CancelToken) -> Result<RunSummary, ScrapeError> {
        cancel.check()?;
        let url = job.source_url.clone();
        let output = self.resolve_listing(&url).await?;
        log::info!(
            "Job {}: '{}' lists {} chapters",
            job.id,
            output.series_title,
            output.chapters.len()
        );

        let defaults = SeriesDefaults::scraped_from(&url, output.cover_image_url.clone());
        let (series, created) = with_conn(&self.db, |c| {
            db::upsert_series(c, job.owner_id, &output.series_title, &defaults, now())
        })?;
        log::info!(
            "Job {}: series {} '{}' ({})",
            job.id,
            series.id,
            series.title,
            if created { "created" } else { "existing" }
        );

        let series_dir = series_folder(&self.settings.media_subdir, &series);
        tokio::fs::create_dir_all(self.settings.media_root.join(&series_dir)).await?;
        job.series_id = Some(series.id);
        job.media_root = series_dir.clone();
        job.updated_at = now();
        self.save(job)?;

        let mut summary = RunSummary::default();
        for mut chapter in output.chapters {
            cancel.check()?;

            let chapter_url = chapter.source_url.clone();
            let accept = |html: &str| !extract_images(html, &chapter_url).is_empty();
            let html = self
                .fetcher
                .fetch_html(&chapter_url, ResourceClass::Chapter, &accept)
                .await?;
            chapter.images = extract_images(&html, &chapter_url);

            if chapter.images.is_empty() {
                log::warn!("Job {}: no images for chapter {} ({})", job.id, chapter.chapter_number, chapter_url);
                summary.skipped.push(chapter.chapter_number);
                continue;
            }

            cancel.check()?;
            self.persist_chapter(job, &series, &series_dir, chapter, &mut summary).await?;
        }

        Ok(summary)
    }

    fn download_options(&self, referer: &str) -> DownloadOptions {
        let via_proxy = self.fetcher.images_via_proxy();
        let concurrency = if via_proxy {
            self.settings.concurrency.min(self.settings.proxy_concurrency_cap)
        } else {
            self.settings.concurrency
        };
        DownloadOptions {
            concurrency,
            attempts: self.settings.attempts,
            referer: Some(referer.to_string()),
            // the proxy client runs its own limiter
            limiter: if via_proxy { None } else { self.image_limiter.clone() },
        }
    }

    async fn persist_chapter(
        &self,
        job: &mut ScrapeJob,
        series: &Series,
        series_dir: &str,
        chapter: ScrapedChapter,
        summary: &mut RunSummary,
    ) -> Result<(), ScrapeError> {
        let number = chapter.chapter_number;
        let folder = format!("{}/{}", series_dir, chapter_folder_name(number));
        // Images land in a staging folder; the stored folder is only replaced
        // once at least one image made it
        let staging = format!("{}.partial", folder);
        let staging_path = self.settings.media_root.join(&staging);
        prepare_dir(&staging_path).await?;

        let options = self.download_options(&chapter.source_url);
        let report = download_all(
            self.fetcher.as_ref(),
            &chapter.images,
            &self.settings.media_root,
            &staging,
            &options,
        )
        .await?;
        summary.failed_images += report.failures.len();

        if report.stored.is_empty() {
            log::warn!(
                "Job {}: every image of chapter {} failed, not saving it",
                job.id,
                number
            );
            remove_dir(&staging_path).await?;
            summary.skipped.push(number);
            return Ok(());
        }

        promote_dir(&staging_path, &self.settings.media_root.join(&folder)).await?;
        let paths: Vec<String> = report
            .stored
            .iter()
            .map(|p| match p.strip_prefix(staging.as_str()) {
                Some(rest) => format!("{}{}", folder, rest),
                None => p.clone(),
            })
            .collect();

        let stored = paths.len();
        let defaults = ChapterDefaults {
            title: chapter.title,
            release_date: chapter.release_date,
            local_folder: folder,
            local_image_paths: paths,
        };
        let ts = now();
        with_conn(&self.db, |c| {
            db::upsert_chapter(c, series.id, number, &defaults, ts)?;
            db::advance_current_chapter(c, series.id, number, ts)
        })?;

        job.record_chapter(stored, ts);
        self.save(job)?;
        summary.chapters += 1;
        log::info!(
            "Job {}: chapter {} saved with {}/{} images",
            job.id,
            number,
            stored,
            chapter.images.len()
        );
        Ok(())
    }
}
