//! On-disk library scanner.
//!
//! Walks the library root one level deep: every child directory is a manga,
//! every grandchild directory or `.zip`/`.cbz` file is a chapter candidate.
//! Missing manga rows are created with defaults; chapter rows are batch
//! inserted. The scan stops at the first structural error rather than
//! leaving a silently partial database.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{AppEvent, EventBus, ScanProgress};
use crate::models::{Manga, NewChapter};
use crate::repo::{RepoError, Repositories};

/// Error type for library scans.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Directory listing failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Repository access failed.
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Totals of one scan pass.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub manga_seen: usize,
    pub chapters_added: usize,
}

/// Synchronizes the database with the on-disk library.
#[derive(Debug, Clone)]
pub struct LibraryScanner {
    repos: Repositories,
    events: EventBus,
}

impl LibraryScanner {
    #[must_use]
    pub fn new(repos: Repositories, events: EventBus) -> Self {
        Self { repos, events }
    }

    /// Scans `root` and inserts missing manga and chapter rows, emitting a
    /// `scanProgress` event per manga processed.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Io`] or [`ScanError::Repo`] at the first
    /// structural failure.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn scan(&self, root: &Path) -> Result<ScanSummary, ScanError> {
        let manga_dirs = sorted_children(root, |entry| entry.is_dir())?;
        let total_manga = manga_dirs.len();
        let mut summary = ScanSummary::default();

        for (index, manga_dir) in manga_dirs.iter().enumerate() {
            let title = manga_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let manga = self.get_or_create_manga(&title).await?;
            let chapters = self.collect_chapters(&manga, &title, manga_dir).await?;

            if !chapters.is_empty() {
                self.repos.chapter.batch_insert(&chapters).await?;
            }
            summary.manga_seen += 1;
            summary.chapters_added += chapters.len();

            self.events.publish(AppEvent::ScanProgress(ScanProgress {
                main_title: title,
                index_manga: index + 1,
                total_manga,
                total_chapters: chapters.len(),
            }));
        }

        info!(
            manga = summary.manga_seen,
            chapters = summary.chapters_added,
            "library scan complete"
        );
        Ok(summary)
    }

    async fn get_or_create_manga(&self, title: &str) -> Result<Manga, ScanError> {
        if let Some(existing) = self.repos.manga.get_by_title(title).await? {
            return Ok(existing);
        }

        let id = self.repos.manga.insert(title, "", 0, 1).await?;
        let manga = self
            .repos
            .manga
            .get_by_id(id)
            .await?
            .unwrap_or_else(|| Manga {
                id,
                main_title: title.to_string(),
                status_id: 1,
                ..Manga::default()
            });
        debug!(title, id, "created manga from directory");
        self.events.publish(AppEvent::MangaSaved(manga.clone()));
        Ok(manga)
    }

    /// Builds chapter rows for one manga directory, skipping unparsable
    /// names and chapter numbers already present (on disk twice or already
    /// in the database).
    async fn collect_chapters(
        &self,
        manga: &Manga,
        title: &str,
        manga_dir: &Path,
    ) -> Result<Vec<NewChapter>, ScanError> {
        let mut seen: HashSet<u64> = self
            .repos
            .chapter
            .get_by_manga_id(manga.id)
            .await?
            .iter()
            .map(|chapter| chapter.chapter_number.to_bits())
            .collect();

        let mut chapters = Vec::new();
        for candidate in sorted_children(manga_dir, |_| true)? {
            let Some(file_name) = candidate.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };

            let is_dir = candidate.is_dir();
            let lower = file_name.to_lowercase();
            let is_archive = !is_dir && (lower.ends_with(".zip") || lower.ends_with(".cbz"));
            if !is_dir && !is_archive {
                continue;
            }

            let base = if is_archive {
                candidate
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file_name.clone())
            } else {
                file_name.clone()
            };

            let Some(number) = parse_chapter_number(&base) else {
                warn!(name = %file_name, "skipping unparsable chapter name");
                continue;
            };
            if !seen.insert(number.to_bits()) {
                debug!(name = %file_name, number, "skipping duplicate chapter number");
                continue;
            }

            chapters.push(NewChapter {
                manga_id: manga.id,
                chapter_number: number,
                chapter_title: Some(base),
                // Relative path with forward slashes regardless of host OS.
                path: Some(format!("{title}/{file_name}")),
                is_compressed: i64::from(is_archive),
                status: Some("valid".to_string()),
                ..NewChapter::default()
            });
        }
        Ok(chapters)
    }
}

/// Direct children of `dir` matching `keep`, sorted by name for
/// deterministic scan order.
fn sorted_children(
    dir: &Path,
    keep: impl Fn(&Path) -> bool,
) -> Result<Vec<PathBuf>, ScanError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut children: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ScanError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if keep(&path) {
            children.push(path);
        }
    }
    children.sort();
    Ok(children)
}

/// Parses a chapter number from a directory or archive base name: direct
/// float parse first, then a case-insensitive `chapter` prefix strip with
/// space/dash/underscore trimming.
#[must_use]
pub fn parse_chapter_number(name: &str) -> Option<f64> {
    let trimmed = name.trim();
    if let Ok(number) = trimmed.parse::<f64>() {
        return Some(number).filter(|n| n.is_finite());
    }

    let lower = trimmed.to_lowercase();
    let rest = lower.strip_prefix("chapter")?;
    let rest = rest.trim_matches(|c: char| c == ' ' || c == '-' || c == '_');
    rest.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct_numbers() {
        assert_eq!(parse_chapter_number("1"), Some(1.0));
        assert_eq!(parse_chapter_number("12.5"), Some(12.5));
        assert_eq!(parse_chapter_number(" 3 "), Some(3.0));
    }

    #[test]
    fn test_parse_chapter_prefix() {
        assert_eq!(parse_chapter_number("Chapter 1"), Some(1.0));
        assert_eq!(parse_chapter_number("chapter-2"), Some(2.0));
        assert_eq!(parse_chapter_number("CHAPTER_10.5"), Some(10.5));
        assert_eq!(parse_chapter_number("Chapter   7"), Some(7.0));
    }

    #[test]
    fn test_parse_rejects_noise() {
        assert_eq!(parse_chapter_number("extras"), None);
        assert_eq!(parse_chapter_number("Chapter one"), None);
        assert_eq!(parse_chapter_number(""), None);
        assert_eq!(parse_chapter_number("nan"), None);
        assert_eq!(parse_chapter_number("inf"), None);
    }
}
