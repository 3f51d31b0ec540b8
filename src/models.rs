//! Row types for the persisted library state.
//!
//! Field names mirror the column names so rows map directly with
//! `sqlx::FromRow`, and serialize to the JSON shapes the UI consumes.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A manga series in the library.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct Manga {
    pub id: i64,
    pub main_title: String,
    pub description: String,
    pub year: i64,
    pub status_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// An alternative title attached to a manga.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlternativeTitle {
    pub id: i64,
    pub manga_id: i64,
    pub alternative_title: String,
    pub created_at: String,
}

/// A row of the `manga_status` lookup table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MangaStatus {
    pub id: i64,
    pub name: String,
}

/// A chapter: either an expanded image directory or a compressed archive.
///
/// `path` is relative to the library root and always uses forward-slash
/// separators regardless of host OS. `is_compressed` is 1 when the chapter
/// lives in a `.cbz`/`.zip` archive instead of a directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct Chapter {
    pub chapter_id: i64,
    pub manga_id: i64,
    pub chapter_number: f64,
    pub chapter_title: Option<String>,
    pub volume: Option<i64>,
    pub translator_group: Option<String>,
    pub language: Option<String>,
    pub release_time_ts: Option<i64>,
    pub release_time_raw: Option<String>,
    pub status_read: i64,
    pub path: Option<String>,
    pub is_compressed: i64,
    pub status: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A chapter that has not been inserted yet.
#[derive(Debug, Clone, Default)]
pub struct NewChapter {
    pub manga_id: i64,
    pub chapter_number: f64,
    pub chapter_title: Option<String>,
    pub volume: Option<i64>,
    pub translator_group: Option<String>,
    pub language: Option<String>,
    pub release_time_ts: Option<i64>,
    pub release_time_raw: Option<String>,
    pub status_read: i64,
    pub path: Option<String>,
    pub is_compressed: i64,
    pub status: Option<String>,
}

/// A persisted scraping rule record.
///
/// `domains_json` is a JSON array of domains; `manga_rule_json` and
/// `chapter_rule_json` each hold a serialized
/// [`SiteRule`](crate::scrape::SiteRule).
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct ScrapingRule {
    pub id: i64,
    pub site_key: String,
    pub name: String,
    pub domains_json: String,
    pub website_url: String,
    pub manga_rule_json: String,
    pub chapter_rule_json: String,
    pub enabled: i64,
    pub priority: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A key/value configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

/// Configuration key holding the library root path.
pub const CONFIG_MANGA_DIRECTORY: &str = "manga_directory";
