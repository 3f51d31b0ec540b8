//! Library root resolution with a process-lifetime memo.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::CONFIG_MANGA_DIRECTORY;
use crate::repo::{RepoError, Repositories};

/// Error type for library lookups.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The `manga_directory` config key is not set.
    #[error("config key {CONFIG_MANGA_DIRECTORY:?} is not set")]
    RootNotConfigured,

    /// Repository access failed.
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Resolves and memoizes the library root directory.
///
/// The root comes from the `manga_directory` config key; once read it is
/// cached for the life of the service. Constructed by the composition root
/// and shared, never a hidden global.
#[derive(Debug)]
pub struct LibraryService {
    repos: Repositories,
    root: RwLock<Option<PathBuf>>,
}

impl LibraryService {
    #[must_use]
    pub fn new(repos: Repositories) -> Self {
        Self {
            repos,
            root: RwLock::new(None),
        }
    }

    /// Returns the library root, reading the config on first use.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::RootNotConfigured`] when the key is unset,
    /// or [`LibraryError::Repo`] on query failure.
    pub async fn manga_dir(&self) -> Result<PathBuf, LibraryError> {
        if let Some(root) = self.root.read().await.as_ref() {
            return Ok(root.clone());
        }

        let entry = self
            .repos
            .config
            .get(CONFIG_MANGA_DIRECTORY)
            .await?
            .ok_or(LibraryError::RootNotConfigured)?;
        let root = PathBuf::from(entry.value);

        *self.root.write().await = Some(root.clone());
        Ok(root)
    }

    /// Forgets the memoized root (e.g. after the config changed).
    pub async fn invalidate_root(&self) {
        *self.root.write().await = None;
    }

    /// Repositories this service reads through.
    #[must_use]
    pub fn repos(&self) -> &Repositories {
        &self.repos
    }
}
