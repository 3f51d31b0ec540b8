//! Repository for the key/value `config` table.

use super::RepoError;
use crate::db::Database;
use crate::models::ConfigEntry;

/// Data access for the `config` table.
#[derive(Debug, Clone)]
pub struct ConfigRepo {
    db: Database,
}

impl ConfigRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetches a config entry by key.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn get(&self, key: &str) -> Result<Option<ConfigEntry>, RepoError> {
        let entry = sqlx::query_as::<_, ConfigEntry>(
            "SELECT key, value, updated_at FROM config WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(entry)
    }

    /// Inserts or replaces a config entry.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_at = datetime('now')",
        )
        .bind(key)
        .bind(value)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_overwrite() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = ConfigRepo::new(db);

        assert!(repo.get("manga_directory").await.unwrap().is_none());

        repo.set("manga_directory", "/library").await.unwrap();
        let entry = repo.get("manga_directory").await.unwrap().unwrap();
        assert_eq!(entry.value, "/library");

        repo.set("manga_directory", "/library2").await.unwrap();
        let entry = repo.get("manga_directory").await.unwrap().unwrap();
        assert_eq!(entry.value, "/library2");
    }
}
