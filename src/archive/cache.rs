//! Bounded LRU cache of open archive readers.
//!
//! Opening a ZIP means parsing its central directory; the reader is kept
//! open so page-by-page streaming of the current, previous and next chapter
//! stays cheap. Capacity is small and fixed; the least-recently-used reader
//! is closed when a new archive is opened at capacity.

use std::fs::File;
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, instrument};
use zip::ZipArchive;

use super::ArchiveError;

/// Cache capacity: previous, current and next chapter for a handful of
/// concurrently read manga.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

type CachedReader = Arc<Mutex<ZipArchive<File>>>;

/// Thread-safe LRU cache of open archive readers keyed by archive path.
///
/// All cache mutations are serialised by one mutex. Entry reads copy the
/// entry's bytes out while holding the per-archive reader lock, so eviction
/// can never invalidate a read in progress.
#[derive(Debug)]
pub struct ArchiveCache {
    inner: Mutex<LruCache<PathBuf, CachedReader>>,
}

impl Default for ArchiveCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ArchiveCache {
    /// Creates a cache holding at most `capacity` open readers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached reader for `path` moved to most-recent, opening
    /// (and possibly evicting the least-recent) when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`]/[`ArchiveError::Zip`] when the archive
    /// cannot be opened.
    #[instrument(skip(self), fields(archive = %path.display()))]
    pub fn get_or_open(&self, path: &Path) -> Result<CachedReader, ArchiveError> {
        let mut cache = self.lock();

        if let Some(reader) = cache.get(path) {
            return Ok(Arc::clone(reader));
        }

        let file = File::open(path).map_err(|source| ArchiveError::io(path, source))?;
        let archive = ZipArchive::new(file).map_err(|source| ArchiveError::zip(path, source))?;
        let reader = Arc::new(Mutex::new(archive));

        if let Some((evicted, _)) = cache.push(path.to_path_buf(), Arc::clone(&reader)) {
            if evicted != path {
                debug!(evicted = %evicted.display(), "evicted least-recent archive reader");
            }
        }
        Ok(reader)
    }

    /// Reads a whole entry into memory.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::EntryNotFound`] for a missing entry,
    /// otherwise [`ArchiveError::Io`]/[`ArchiveError::Zip`].
    pub fn read_entry(&self, path: &Path, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let reader = self.get_or_open(path)?;
        let mut archive = reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut entry = archive.by_name(name).map_err(|source| match source {
            zip::result::ZipError::FileNotFound => ArchiveError::EntryNotFound {
                archive: path.to_path_buf(),
                name: name.to_string(),
            },
            other => ArchiveError::zip(path, other),
        })?;

        let mut buffer = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut buffer)
            .map_err(|source| ArchiveError::io(path, source))?;
        Ok(buffer)
    }

    /// Closes and drops the reader for `path` if cached.
    ///
    /// Must be called before rewriting or deleting the archive file.
    pub fn remove(&self, path: &Path) {
        if self.lock().pop(path).is_some() {
            debug!(archive = %path.display(), "closed cached archive reader");
        }
    }

    /// Closes every cached reader and empties the cache.
    pub fn close_all(&self) {
        self.lock().clear();
    }

    /// Number of currently cached readers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when no reader is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns true when `path` is currently cached (without touching LRU
    /// order).
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().peek(path).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, CachedReader>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::archive::compress_dir;

    fn make_archive(dir: &Path, stem: &str) -> PathBuf {
        let chapter = dir.join(stem);
        std::fs::create_dir_all(&chapter).unwrap();
        std::fs::write(chapter.join("001.jpg"), format!("img-{stem}")).unwrap();
        let archive = dir.join(format!("{stem}.cbz"));
        compress_dir(&chapter, &archive).unwrap();
        archive
    }

    #[test]
    fn test_read_entry_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(dir.path(), "ch1");

        let cache = ArchiveCache::new(2);
        assert_eq!(cache.read_entry(&archive, "001.jpg").unwrap(), b"img-ch1");
        assert_eq!(cache.len(), 1);

        // Second read hits the cached reader.
        assert_eq!(cache.read_entry(&archive, "001.jpg").unwrap(), b"img-ch1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let dir = tempfile::tempdir().unwrap();
        let a = make_archive(dir.path(), "a");
        let b = make_archive(dir.path(), "b");
        let c = make_archive(dir.path(), "c");

        let cache = ArchiveCache::new(2);
        cache.get_or_open(&a).unwrap();
        cache.get_or_open(&b).unwrap();
        cache.get_or_open(&c).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&a), "first-opened reader must be evicted");
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
    }

    #[test]
    fn test_access_refreshes_lru_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = make_archive(dir.path(), "a");
        let b = make_archive(dir.path(), "b");
        let c = make_archive(dir.path(), "c");

        let cache = ArchiveCache::new(2);
        cache.get_or_open(&a).unwrap();
        cache.get_or_open(&b).unwrap();
        // Touch a so b becomes the least-recent.
        cache.get_or_open(&a).unwrap();
        cache.get_or_open(&c).unwrap();

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
    }

    #[test]
    fn test_remove_and_close_all() {
        let dir = tempfile::tempdir().unwrap();
        let a = make_archive(dir.path(), "a");
        let b = make_archive(dir.path(), "b");

        let cache = ArchiveCache::new(4);
        cache.get_or_open(&a).unwrap();
        cache.get_or_open(&b).unwrap();

        cache.remove(&a);
        assert!(!cache.contains(&a));
        assert_eq!(cache.len(), 1);

        cache.close_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_archive_is_an_error() {
        let cache = ArchiveCache::new(2);
        let err = cache.get_or_open(Path::new("/nonexistent/x.cbz")).unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(cache.is_empty());
    }
}
