//! Helper functions for the scrape pipeline
//!
//! This module provides the small pure functions shared by extraction,
//! downloading and persistence:
//! - Slugs for storage directories
//! - Chapter number extraction from URLs and link text
//! - URL normalisation against a page base
//! - Image extension guessing
//!
//! # Examples
//!
//! ```
//! use webtoon_scraper::helpers::{slugify, chapter_number_from_url};
//!
//! assert_eq!(slugify("Solo Leveling: Ragnarok"), "solo-leveling-ragnarok");
//! assert_eq!(chapter_number_from_url("https://x.test/manga/demo/chapter-12/"), Some(12));
//! ```

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Extensions kept as-is when they end an image URL path
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

const DEFAULT_IMAGE_EXTENSION: &str = ".jpg";

fn url_chapter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:chapitre-|chapter-|ch-|v\d+-c)(\d+)").expect("static regex")
    })
}

fn text_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("static regex"))
}

fn chapter_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)/(?:chapitre-\d+|chapter-\d+|ch-\d+|vol-\d+-ch-\d+|v\d+-c\d+)(?:[/?#]|$)")
            .expect("static regex")
    })
}

/// Filesystem/URL-safe form of a title
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "series".to_string()
    } else {
        slug
    }
}

/// Chapter index carried by a chapter URL (`chapter-12`, `ch-3`, `v2-c14`...)
pub fn chapter_number_from_url(url: &str) -> Option<u32> {
    url_chapter_re()
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// First number in a link text, `,` read as a decimal point and truncated
pub fn chapter_number_from_text(text: &str) -> Option<u32> {
    let text = text.replace(',', ".");
    let raw = text_number_re().captures(&text)?.get(1)?.as_str();
    let value: f64 = raw.parse().ok()?;
    if value.is_finite() && value >= 0.0 && value <= u32::MAX as f64 {
        Some(value.trunc() as u32)
    } else {
        None
    }
}

/// True when the URL path looks like a single chapter page
pub fn is_chapter_url(url: &str) -> bool {
    chapter_url_re().is_match(url)
}

/// Resolve `raw` against `base`, mapping protocol-relative URLs to https
pub fn normalize_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("data:") || lower.starts_with("mailto:") {
        return None;
    }
    let resolved = if let Some(rest) = raw.strip_prefix("//") {
        Url::parse(&format!("https://{}", rest)).ok()?
    } else {
        base.join(raw).ok()?
    };
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Extension for a stored image, from the URL path or `.jpg`
pub fn guess_extension(url: &str) -> &'static str {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    IMAGE_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(*ext))
        .copied()
        .unwrap_or(DEFAULT_IMAGE_EXTENSION)
}

/// Folder name for a chapter, zero-padded so listings sort naturally
pub fn chapter_folder_name(chapter_number: u32) -> String {
    format!("chapter-{:04}", chapter_number)
}

/// File name for the image at 1-based `index`
pub fn image_file_name(index: usize, url: &str) -> String {
    format!("{:03}{}", index, guess_extension(url))
}

/// Last non-empty path segment of a URL, used when a page has no title
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.replace(['-', '_'], " "))
}

/// Parse the date formats seen in chapter listings
pub fn parse_release_date(text: &str) -> Option<NaiveDate> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    const FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%d/%m/%Y", "%Y-%m-%d", "%d %B %Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
}

/// `HH:MM:SS` for a number of seconds
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (minutes, sec) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{:02}:{:02}:{:02}", hours, minutes, sec)
}

/// Collapse whitespace in scraped text
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
