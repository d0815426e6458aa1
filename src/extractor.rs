//! HTML extraction: chapter links, reader images and series metadata.
//!
//! Locators are tried in priority order and the first one yielding at least
//! one usable URL wins. Chapter lists fall back to a generic anchor scan.

use crate::helpers::{
    chapter_number_from_url, clean_text, is_chapter_url, last_path_segment, normalize_url,
    parse_release_date,
};
use crate::models::{ChapterLink, SeriesMetadata};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Known chapter-list containers (Madara/WP-Manga and friends)
const CHAPTER_LIST_SELECTORS: &[&str] = &[
    "li[class*='wp-manga-chapter'] > a",
    "div[class*='listing-chapters'] a, div[class*='chapter-list'] a",
    "ul.main a, ul[class*='version-chap'] a",
    "#manga-chapters-holder a",
    "#chapterlist a",
];

/// Known reader containers, the last one catches any image
const IMAGE_SELECTORS: &[&str] = &[
    "div[class*='reading-content'] img",
    "div[class*='read-container'] img, div[class*='chapter-content'] img",
    "div[class*='readerarea'] img, div[class*='image-container'] img",
    "img",
];

/// Attributes that hold the real image URL on lazy-loading sites, best first
const LAZY_SRC_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original", "data-cfsrc", "src"];

const CHAPTER_KEYWORDS: &[&str] = &["chapitre", "chapter"];

const DEFAULT_TITLE: &str = "Webtoon";

/// Ordered, deduplicated chapter URLs, oldest first
pub fn extract_chapter_links(html: &str, base_url: &str) -> Vec<String> {
    extract_chapter_entries(html, base_url)
        .into_iter()
        .map(|c| c.url)
        .collect()
}

/// Chapter links with their anchor text and release date, oldest first
pub fn extract_chapter_entries(html: &str, base_url: &str) -> Vec<ChapterLink> {
    let base = match Url::parse(base_url) {
        Ok(base) => base,
        Err(e) => {
            log::warn!("Cannot resolve links against {}: {}", base_url, e);
            return Vec::new();
        }
    };
    let document = Html::parse_document(html);

    // Inside a known container every anchor is a chapter, whatever its URL
    let mut found = Vec::new();
    for sel in CHAPTER_LIST_SELECTORS {
        if let Ok(selector) = Selector::parse(sel) {
            found = collect_links(document.select(&selector), &base, |_, _| true);
            if !found.is_empty() {
                log::debug!("Chapter list matched '{}' ({} links)", sel, found.len());
                break;
            }
        }
    }

    if found.is_empty() {
        if let Ok(selector) = Selector::parse("a[href]") {
            found = collect_links(document.select(&selector), &base, |url, text| {
                is_chapter_url(url) || has_chapter_keyword(text)
            });
            log::debug!("Generic link scan found {} chapter links", found.len());
        }
    }

    order_chapters(found)
}

fn has_chapter_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    CHAPTER_KEYWORDS.iter().any(|k| lower.contains(k)) || text.contains("Ch.") || text.contains("Ch-")
}

/// Resolve, filter and dedupe anchors, keeping first-seen order
fn collect_links<'a>(
    anchors: impl Iterator<Item = ElementRef<'a>>,
    base: &Url,
    keep: impl Fn(&str, &str) -> bool,
) -> Vec<ChapterLink> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for a in anchors {
        let Some(url) = a.value().attr("href").and_then(|h| normalize_url(h, base)) else {
            continue;
        };
        let title = clean_text(&a.text().collect::<String>());
        if !keep(&url, &title) || !seen.insert(url.clone()) {
            continue;
        }
        out.push(ChapterLink {
            url,
            title,
            release_date: release_date_near(a),
        });
    }
    out
}

/// `.chapter-release-date` next to the anchor, as Madara renders it
fn release_date_near(anchor: ElementRef<'_>) -> Option<chrono::NaiveDate> {
    let parent = anchor.parent().and_then(ElementRef::wrap)?;
    let selector = Selector::parse(".chapter-release-date").ok()?;
    let el = parent.select(&selector).next()?;
    parse_release_date(&el.text().collect::<String>())
}

/// Put discovered chapters in chronological order.
///
/// Entries whose URL carries a number are sorted ascending. The rest keep
/// discovery order and go last, reversed when the numbered ones were listed
/// newest first. With no numbers at all the listing is assumed newest first
/// and reversed as a whole.
pub fn order_chapters(entries: Vec<ChapterLink>) -> Vec<ChapterLink> {
    let mut numbered = Vec::new();
    let mut unnumbered = Vec::new();
    for entry in entries {
        match chapter_number_from_url(&entry.url) {
            Some(n) => numbered.push((n, entry)),
            None => unnumbered.push(entry),
        }
    }

    if numbered.is_empty() {
        unnumbered.reverse();
        return unnumbered;
    }

    let descending = match (numbered.first(), numbered.last()) {
        (Some((first, _)), Some((last, _))) => first > last,
        _ => false,
    };
    if descending {
        unnumbered.reverse();
    }

    numbered.sort_by_key(|(n, _)| *n);
    numbered
        .into_iter()
        .map(|(_, entry)| entry)
        .chain(unnumbered)
        .collect()
}

/// Ordered, deduplicated reader image URLs
pub fn extract_images(html: &str, base_url: &str) -> Vec<String> {
    let base = match Url::parse(base_url) {
        Ok(base) => base,
        Err(e) => {
            log::warn!("Cannot resolve images against {}: {}", base_url, e);
            return Vec::new();
        }
    };
    let document = Html::parse_document(html);

    for sel in IMAGE_SELECTORS {
        if let Ok(selector) = Selector::parse(sel) {
            let mut seen = HashSet::new();
            let images: Vec<String> = document
                .select(&selector)
                .filter_map(best_image_source)
                .filter_map(|src| normalize_url(src, &base))
                .filter(|url| seen.insert(url.clone()))
                .collect();
            if !images.is_empty() {
                log::debug!("Images matched '{}' ({} images)", sel, images.len());
                return images;
            }
        }
    }
    Vec::new()
}

/// Largest `srcset` candidate, then lazy-load attributes, then `src`
fn best_image_source<'a>(img: ElementRef<'a>) -> Option<&'a str> {
    let el = img.value();
    let srcset = el.attr("srcset").or_else(|| el.attr("data-srcset"));
    if let Some(last) = srcset.and_then(|s| {
        s.split(',')
            .filter_map(|part| part.split_whitespace().next())
            .last()
    }) {
        return Some(last);
    }
    LAZY_SRC_ATTRS
        .iter()
        .filter_map(|attr| el.attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

/// Series title and cover from a listing page
pub fn extract_series_metadata(html: &str, page_url: &str) -> SeriesMetadata {
    let document = Html::parse_document(html);

    let h1 = Selector::parse("h1").ok().and_then(|s| {
        document
            .select(&s)
            .map(|e| clean_text(&e.text().collect::<String>()))
            .find(|t| !t.is_empty())
    });
    let title = h1
        .or_else(|| meta_content(&document, "og:title"))
        .or_else(|| last_path_segment(page_url))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let base = Url::parse(page_url).ok();
    let cover = Selector::parse("img[class]")
        .ok()
        .and_then(|s| {
            document
                .select(&s)
                .filter(|img| {
                    img.value()
                        .attr("class")
                        .map(|c| c.to_lowercase().contains("cover"))
                        .unwrap_or(false)
                })
                .find_map(best_image_source)
                .map(str::to_string)
        })
        .or_else(|| meta_content(&document, "og:image"));
    let cover_image_url = match (cover, base) {
        (Some(raw), Some(base)) => normalize_url(&raw, &base),
        (Some(raw), None) => Some(raw),
        _ => None,
    };

    SeriesMetadata {
        title,
        cover_image_url,
    }
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[property='{}']", property)).ok()?;
    document
        .select(&selector)
        .filter_map(|m| m.value().attr("content"))
        .map(clean_text)
        .find(|c| !c.is_empty())
}
