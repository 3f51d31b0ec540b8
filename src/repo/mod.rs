//! CRUD repositories over the library schema.
//!
//! Each repository wraps the shared [`Database`] pool and exposes the
//! operations the pipeline needs; no transactions span repositories.

mod chapter;
mod config;
mod manga;
mod scraping_rule;

pub use chapter::ChapterRepo;
pub use config::ConfigRepo;
pub use manga::MangaRepo;
pub use scraping_rule::ScrapingRuleRepo;

use thiserror::Error;

use crate::db::Database;

/// Error type for repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Underlying database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Aggregate of all repositories, constructed once by the composition root.
#[derive(Debug, Clone)]
pub struct Repositories {
    pub manga: MangaRepo,
    pub chapter: ChapterRepo,
    pub config: ConfigRepo,
    pub scraping_rule: ScrapingRuleRepo,
}

impl Repositories {
    /// Builds every repository over the same database pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            manga: MangaRepo::new(db.clone()),
            chapter: ChapterRepo::new(db.clone()),
            config: ConfigRepo::new(db.clone()),
            scraping_rule: ScrapingRuleRepo::new(db),
        }
    }
}
