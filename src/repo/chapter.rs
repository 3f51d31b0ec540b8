//! Repository for chapter rows.

use tracing::instrument;

use super::RepoError;
use crate::db::Database;
use crate::models::{Chapter, NewChapter};

const CHAPTER_COLUMNS: &str = "chapter_id, manga_id, chapter_number, chapter_title, volume, \
     translator_group, language, release_time_ts, release_time_raw, status_read, path, \
     is_compressed, status, created_at, updated_at";

/// Data access for the `chapters` table.
#[derive(Debug, Clone)]
pub struct ChapterRepo {
    db: Database,
}

impl ChapterRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a chapter and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] if the insert fails.
    #[instrument(skip(self, chapter), fields(manga_id = chapter.manga_id, number = chapter.chapter_number))]
    pub async fn insert(&self, chapter: &NewChapter) -> Result<i64, RepoError> {
        let result = sqlx::query(
            "INSERT INTO chapters (
                manga_id, chapter_number, chapter_title, volume, translator_group, language,
                release_time_ts, release_time_raw, status_read, path, is_compressed, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chapter.manga_id)
        .bind(chapter.chapter_number)
        .bind(&chapter.chapter_title)
        .bind(chapter.volume)
        .bind(&chapter.translator_group)
        .bind(&chapter.language)
        .bind(chapter.release_time_ts)
        .bind(&chapter.release_time_raw)
        .bind(chapter.status_read)
        .bind(&chapter.path)
        .bind(chapter.is_compressed)
        .bind(&chapter.status)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Inserts a batch of chapters inside a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] and rolls back if any insert fails.
    #[instrument(skip(self, chapters), fields(count = chapters.len()))]
    pub async fn batch_insert(&self, chapters: &[NewChapter]) -> Result<(), RepoError> {
        let mut tx = self.db.pool().begin().await?;
        for chapter in chapters {
            sqlx::query(
                "INSERT INTO chapters (
                    manga_id, chapter_number, chapter_title, volume, translator_group, language,
                    release_time_ts, release_time_raw, status_read, path, is_compressed, status
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chapter.manga_id)
            .bind(chapter.chapter_number)
            .bind(&chapter.chapter_title)
            .bind(chapter.volume)
            .bind(&chapter.translator_group)
            .bind(&chapter.language)
            .bind(chapter.release_time_ts)
            .bind(&chapter.release_time_raw)
            .bind(chapter.status_read)
            .bind(&chapter.path)
            .bind(chapter.is_compressed)
            .bind(&chapter.status)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Lists chapters for a manga, newest chapter number first.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn get_by_manga_id(&self, manga_id: i64) -> Result<Vec<Chapter>, RepoError> {
        let rows = sqlx::query_as::<_, Chapter>(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters
             WHERE manga_id = ? ORDER BY chapter_number DESC"
        ))
        .bind(manga_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Fetches one chapter by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Chapter>, RepoError> {
        let row = sqlx::query_as::<_, Chapter>(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE chapter_id = ?"
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Updates a chapter's mutable fields.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn update(&self, chapter: &Chapter) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE chapters
             SET chapter_number = ?, chapter_title = ?, volume = ?, translator_group = ?,
                 language = ?, release_time_ts = ?, release_time_raw = ?, status_read = ?,
                 path = ?, is_compressed = ?, status = ?, updated_at = datetime('now')
             WHERE chapter_id = ?",
        )
        .bind(chapter.chapter_number)
        .bind(&chapter.chapter_title)
        .bind(chapter.volume)
        .bind(&chapter.translator_group)
        .bind(&chapter.language)
        .bind(chapter.release_time_ts)
        .bind(&chapter.release_time_raw)
        .bind(chapter.status_read)
        .bind(&chapter.path)
        .bind(chapter.is_compressed)
        .bind(&chapter.status)
        .bind(chapter.chapter_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Deletes a chapter row.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn delete(&self, id: i64) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM chapters WHERE chapter_id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
