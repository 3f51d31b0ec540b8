//! Repository for persisted scraping rules.

use tracing::instrument;

use super::RepoError;
use crate::db::Database;
use crate::models::ScrapingRule;

const RULE_COLUMNS: &str = "id, site_key, name, domains_json, website_url, manga_rule_json, \
     chapter_rule_json, enabled, priority, created_at, updated_at";

/// Data access for the `scraping_rules` table.
#[derive(Debug, Clone)]
pub struct ScrapingRuleRepo {
    db: Database,
}

impl ScrapingRuleRepo {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a rule record and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] if the insert fails (including
    /// duplicate `site_key`).
    #[instrument(skip(self, rule), fields(site_key = %rule.site_key))]
    pub async fn insert(&self, rule: &ScrapingRule) -> Result<i64, RepoError> {
        let result = sqlx::query(
            "INSERT INTO scraping_rules (
                site_key, name, domains_json, website_url,
                manga_rule_json, chapter_rule_json, enabled, priority
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.site_key)
        .bind(&rule.name)
        .bind(&rule.domains_json)
        .bind(&rule.website_url)
        .bind(&rule.manga_rule_json)
        .bind(&rule.chapter_rule_json)
        .bind(rule.enabled)
        .bind(rule.priority)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Lists every rule ordered by priority (highest first).
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn list(&self) -> Result<Vec<ScrapingRule>, RepoError> {
        let rows = sqlx::query_as::<_, ScrapingRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM scraping_rules ORDER BY priority DESC"
        ))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Fetches a rule by its site key.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn get_by_site_key(&self, site_key: &str) -> Result<Option<ScrapingRule>, RepoError> {
        let row = sqlx::query_as::<_, ScrapingRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM scraping_rules WHERE site_key = ?"
        ))
        .bind(site_key)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Updates a rule identified by its site key.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn update(&self, rule: &ScrapingRule) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE scraping_rules
             SET name = ?, domains_json = ?, website_url = ?, manga_rule_json = ?,
                 chapter_rule_json = ?, enabled = ?, priority = ?, updated_at = datetime('now')
             WHERE site_key = ?",
        )
        .bind(&rule.name)
        .bind(&rule.domains_json)
        .bind(&rule.website_url)
        .bind(&rule.manga_rule_json)
        .bind(&rule.chapter_rule_json)
        .bind(rule.enabled)
        .bind(rule.priority)
        .bind(&rule.site_key)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Deletes a rule by site key.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Database`] on query failure.
    pub async fn delete(&self, site_key: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM scraping_rules WHERE site_key = ?")
            .bind(site_key)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
