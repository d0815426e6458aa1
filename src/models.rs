use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A tracked series, unique per `(owner_id, title)`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Series {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub kind: String,
    pub language: String,
    pub status: String,
    pub rating: f64,
    /// Latest chapter number known for the series
    pub current_chapter: u32,
    pub link: String,
    pub image_url: String,
    pub comment: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Values used when a series has to be created
#[derive(Debug, Clone)]
pub struct SeriesDefaults {
    pub link: String,
    pub image_url: Option<String>,
    pub kind: String,
    pub language: String,
    pub status: String,
    pub comment: String,
}

impl SeriesDefaults {
    /// Defaults for a series discovered by scraping `source_url`
    pub fn scraped_from(source_url: &str, cover: Option<String>) -> Self {
        Self {
            link: source_url.to_string(),
            image_url: cover,
            kind: "Scraper".to_string(),
            language: "Francais".to_string(),
            status: "En cours".to_string(),
            comment: format!("Scraped automatically from {}", source_url),
        }
    }
}

/// A stored chapter, unique per `(series_id, chapter_number)`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chapter {
    pub id: i64,
    pub series_id: i64,
    pub chapter_number: u32,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    /// Folder relative to the media root
    pub local_folder: String,
    /// Image paths relative to the media root, in reading order
    pub local_image_paths: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Scraper-owned chapter fields, replaced on every upsert
#[derive(Debug, Clone)]
pub struct ChapterDefaults {
    pub title: String,
    pub release_date: Option<NaiveDate>,
    pub local_folder: String,
    pub local_image_paths: Vec<String>,
}

/// A chapter link found on a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterLink {
    pub url: String,
    pub title: String,
    pub release_date: Option<NaiveDate>,
}

/// Title and cover found on a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMetadata {
    pub title: String,
    pub cover_image_url: Option<String>,
}

/// One chapter as scraped, before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedChapter {
    pub title: String,
    pub chapter_number: u32,
    pub source_url: String,
    pub images: Vec<String>,
    pub release_date: Option<NaiveDate>,
}

/// Everything a listing page resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutput {
    pub series_title: String,
    pub cover_image_url: Option<String>,
    pub chapters: Vec<ScrapedChapter>,
}

/// Body of a scrape submission
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScrapeRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}
