//! Chapter archive layer: CBZ/ZIP compression, entry access and a bounded
//! cache of open archive readers.
//!
//! Archive-internal paths always use forward slashes; page images are named
//! so a lexicographic sort of entries equals page order.

mod cache;
mod compress;

pub use cache::{ArchiveCache, DEFAULT_CACHE_CAPACITY};
pub use compress::{
    compress_dir, delete_entries, extract_all, extract_entry, is_image, is_precompressed,
    list_images,
};

use std::path::PathBuf;

use thiserror::Error;

/// Error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive itself is malformed or could not be written.
    #[error("zip error on {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Directory walk failed while compressing.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Compression source is not a directory.
    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },

    /// The named entry does not exist in the archive.
    #[error("entry {name:?} not found in {archive}")]
    EntryNotFound { archive: PathBuf, name: String },

    /// An entry's name would escape the extraction directory (Zip-Slip).
    #[error("entry {name:?} escapes the extraction directory")]
    UnsafeEntry { name: String },
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }
}
