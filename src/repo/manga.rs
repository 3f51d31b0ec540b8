//! Repository for manga and alternative-title rows.

use tracing::instrument;

use super::RepoError;
use crate::db::Database;
use crate::models::{AlternativeTitle, Manga};

/// Data access for the `manga` and `alternative_titles` tables.
#[derive(Debug, Clone)]
pub struct MangaRepo {
    db: Database,
}

impl MangaRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a manga and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn insert(
        &self,
        main_title: &str,
        description: &str,
        year: i64,
        status_id: i64,
    ) -> Result<i64, RepoError> {
        let result = sqlx::query(
            "INSERT INTO manga (main_title, description, year, status_id) VALUES (?, ?, ?, ?)",
        )
        .bind(main_title)
        .bind(description)
        .bind(year)
        .bind(status_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Fetches a manga by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Manga>, RepoError> {
        let manga = sqlx::query_as::<_, Manga>(
            "SELECT id, main_title, description, year, status_id, created_at, updated_at
             FROM manga WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(manga)
    }

    /// Fetches a manga by its main title (exact match).
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn get_by_title(&self, main_title: &str) -> Result<Option<Manga>, RepoError> {
        let manga = sqlx::query_as::<_, Manga>(
            "SELECT id, main_title, description, year, status_id, created_at, updated_at
             FROM manga WHERE main_title = ?",
        )
        .bind(main_title)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(manga)
    }

    /// Lists every manga ordered by title.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn list(&self) -> Result<Vec<Manga>, RepoError> {
        let rows = sqlx::query_as::<_, Manga>(
            "SELECT id, main_title, description, year, status_id, created_at, updated_at
             FROM manga ORDER BY main_title",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Updates a manga's mutable fields.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    #[instrument(skip(self, manga), fields(id = manga.id))]
    pub async fn update(&self, manga: &Manga) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE manga
             SET main_title = ?, description = ?, year = ?, status_id = ?,
                 updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(&manga.main_title)
        .bind(&manga.description)
        .bind(manga.year)
        .bind(manga.status_id)
        .bind(manga.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Deletes a manga; chapters and alternative titles cascade.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn delete(&self, id: i64) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM manga WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Adds an alternative title to a manga.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn add_alternative_title(
        &self,
        manga_id: i64,
        title: &str,
    ) -> Result<i64, RepoError> {
        let result = sqlx::query(
            "INSERT INTO alternative_titles (manga_id, alternative_title) VALUES (?, ?)",
        )
        .bind(manga_id)
        .bind(title)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Lists alternative titles for a manga.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn alternative_titles(
        &self,
        manga_id: i64,
    ) -> Result<Vec<AlternativeTitle>, RepoError> {
        let rows = sqlx::query_as::<_, AlternativeTitle>(
            "SELECT id, manga_id, alternative_title, created_at
             FROM alternative_titles WHERE manga_id = ?",
        )
        .bind(manga_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_lookup_by_title() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = MangaRepo::new(db);

        let id = repo.insert("One Piece", "", 1997, 2).await.unwrap();
        assert!(id > 0);

        let found = repo.get_by_title("One Piece").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.year, 1997);

        assert!(repo.get_by_title("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = MangaRepo::new(db);

        let id = repo.insert("Alpha", "", 0, 1).await.unwrap();
        let mut manga = repo.get_by_id(id).await.unwrap().unwrap();
        manga.description = "updated".to_string();
        repo.update(&manga).await.unwrap();

        let reloaded = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(reloaded.description, "updated");

        repo.delete(id).await.unwrap();
        assert!(repo.get_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_alternative_titles_roundtrip() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = MangaRepo::new(db);

        let id = repo.insert("Alpha", "", 0, 1).await.unwrap();
        repo.add_alternative_title(id, "アルファ").await.unwrap();

        let titles = repo.alternative_titles(id).await.unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].alternative_title, "アルファ");
    }
}
