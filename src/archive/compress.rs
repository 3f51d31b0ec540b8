//! Directory compression and archive entry operations.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::cache::ArchiveCache;
use super::ArchiveError;

/// Image extensions recognised inside chapter archives.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "avif"];

/// Non-image extensions that are already compressed and therefore stored
/// rather than deflated.
const PRECOMPRESSED_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "gz", "mp4", "mkv", "avi", "mov"];

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Returns true when the filename has an image extension.
#[must_use]
pub fn is_image(name: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension_of(name).as_str())
}

/// Returns true when deflating the file would be wasted work.
#[must_use]
pub fn is_precompressed(name: &str) -> bool {
    is_image(name) || PRECOMPRESSED_EXTENSIONS.contains(&extension_of(name).as_str())
}

fn archive_entry_name(rel: &Path) -> String {
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn entry_options(path: &Path, name: &str) -> SimpleFileOptions {
    let method = if is_precompressed(name) {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let mut options = SimpleFileOptions::default().compression_method(method);

    // Preserve the source file's modification time when representable.
    if let Ok(metadata) = std::fs::metadata(path) {
        if let Ok(modified) = metadata.modified() {
            if let Ok(datetime) = zip::DateTime::try_from(time::OffsetDateTime::from(modified)) {
                options = options.last_modified_time(datetime);
            }
        }
    }
    options
}

/// Compresses a directory into a ZIP/CBZ archive.
///
/// Every file is written under its forward-slash relative path. Inputs that
/// are already compressed (images, archives, media) are stored; everything
/// else is deflated.
///
/// # Errors
///
/// Returns [`ArchiveError::NotADirectory`] when `source_dir` is not a
/// directory, or an [`ArchiveError::Io`]/[`ArchiveError::Zip`] on failure.
#[instrument(skip_all, fields(source = %source_dir.display(), dest = %dest_archive.display()))]
pub fn compress_dir(source_dir: &Path, dest_archive: &Path) -> Result<(), ArchiveError> {
    let metadata =
        std::fs::metadata(source_dir).map_err(|source| ArchiveError::io(source_dir, source))?;
    if !metadata.is_dir() {
        return Err(ArchiveError::NotADirectory {
            path: source_dir.to_path_buf(),
        });
    }

    let out =
        File::create(dest_archive).map_err(|source| ArchiveError::io(dest_archive, source))?;
    let mut writer = ZipWriter::new(BufWriter::new(out));

    let mut count = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        let name = archive_entry_name(rel);

        writer
            .start_file(name.as_str(), entry_options(entry.path(), &name))
            .map_err(|source| ArchiveError::zip(dest_archive, source))?;

        let mut file =
            File::open(entry.path()).map_err(|source| ArchiveError::io(entry.path(), source))?;
        std::io::copy(&mut file, &mut writer)
            .map_err(|source| ArchiveError::io(entry.path(), source))?;
        count += 1;
    }

    writer
        .finish()
        .map_err(|source| ArchiveError::zip(dest_archive, source))?
        .flush()
        .map_err(|source| ArchiveError::io(dest_archive, source))?;

    info!(entries = count, "compressed chapter directory");
    Ok(())
}

/// Lists image entry names in an archive, sorted lexicographically.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] or [`ArchiveError::Zip`] if the archive
/// cannot be opened.
pub fn list_images(archive_path: &Path) -> Result<Vec<String>, ArchiveError> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::io(archive_path, source))?;
    let mut archive =
        ZipArchive::new(file).map_err(|source| ArchiveError::zip(archive_path, source))?;

    let mut images = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|source| ArchiveError::zip(archive_path, source))?;
        if entry.is_dir() {
            continue;
        }
        if is_image(entry.name()) {
            images.push(entry.name().to_string());
        }
    }

    images.sort();
    Ok(images)
}

/// Streams a single entry out of an archive to `dest_path`, creating parent
/// directories as needed.
///
/// # Errors
///
/// Returns [`ArchiveError::EntryNotFound`] for a missing entry, otherwise
/// [`ArchiveError::Io`]/[`ArchiveError::Zip`].
pub fn extract_entry(
    archive_path: &Path,
    name: &str,
    dest_path: &Path,
) -> Result<(), ArchiveError> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::io(archive_path, source))?;
    let mut archive =
        ZipArchive::new(file).map_err(|source| ArchiveError::zip(archive_path, source))?;

    let mut entry = archive.by_name(name).map_err(|source| match source {
        zip::result::ZipError::FileNotFound => ArchiveError::EntryNotFound {
            archive: archive_path.to_path_buf(),
            name: name.to_string(),
        },
        other => ArchiveError::zip(archive_path, other),
    })?;

    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ArchiveError::io(parent, source))?;
    }
    let mut out = File::create(dest_path).map_err(|source| ArchiveError::io(dest_path, source))?;
    std::io::copy(&mut entry, &mut out).map_err(|source| ArchiveError::io(dest_path, source))?;
    Ok(())
}

/// Extracts every entry into `dest_dir`.
///
/// Entry names are validated up front: any name whose resolved path would
/// escape `dest_dir` aborts the whole operation before a single byte is
/// written (Zip-Slip defence).
///
/// # Errors
///
/// Returns [`ArchiveError::UnsafeEntry`] naming the offending entry, or an
/// [`ArchiveError::Io`]/[`ArchiveError::Zip`] on failure.
#[instrument(skip_all, fields(archive = %archive_path.display(), dest = %dest_dir.display()))]
pub fn extract_all(archive_path: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::io(archive_path, source))?;
    let mut archive =
        ZipArchive::new(file).map_err(|source| ArchiveError::zip(archive_path, source))?;

    // Validation pass: every name must stay inside dest_dir.
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|source| ArchiveError::zip(archive_path, source))?;
        if entry.enclosed_name().is_none() {
            return Err(ArchiveError::UnsafeEntry {
                name: entry.name().to_string(),
            });
        }
    }

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source| ArchiveError::zip(archive_path, source))?;
        let Some(rel) = entry.enclosed_name() else {
            continue;
        };
        let dest = dest_dir.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest).map_err(|source| ArchiveError::io(&dest, source))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArchiveError::io(parent, source))?;
        }
        let mut out = File::create(&dest).map_err(|source| ArchiveError::io(&dest, source))?;
        std::io::copy(&mut entry, &mut out).map_err(|source| ArchiveError::io(&dest, source))?;
    }

    debug!(entries = archive.len(), "extracted archive");
    Ok(())
}

/// Rebuilds the archive without the named entries.
///
/// The cached reader for this archive is evicted and closed first (hosts
/// that forbid overwriting open files). Kept entries are copied with their
/// headers preserved into a temporary archive in the same directory, which
/// is then renamed over the original; on any failure the temporary file is
/// removed.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`]/[`ArchiveError::Zip`] on failure.
#[instrument(skip(cache, names), fields(archive = %archive_path.display(), remove = names.len()))]
pub fn delete_entries(
    cache: &ArchiveCache,
    archive_path: &Path,
    names: &[String],
) -> Result<(), ArchiveError> {
    cache.remove(archive_path);

    let remove: HashSet<&str> = names.iter().map(String::as_str).collect();
    let tmp_path = temp_sibling(archive_path);

    let result = rebuild_without(archive_path, &tmp_path, &remove);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
        return result;
    }

    std::fs::rename(&tmp_path, archive_path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp_path);
        ArchiveError::io(archive_path, source)
    })
}

fn temp_sibling(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(".rebuild");
    PathBuf::from(name)
}

fn rebuild_without(
    archive_path: &Path,
    tmp_path: &Path,
    remove: &HashSet<&str>,
) -> Result<(), ArchiveError> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::io(archive_path, source))?;
    let mut archive =
        ZipArchive::new(file).map_err(|source| ArchiveError::zip(archive_path, source))?;

    let out = File::create(tmp_path).map_err(|source| ArchiveError::io(tmp_path, source))?;
    let mut writer = ZipWriter::new(BufWriter::new(out));

    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|source| ArchiveError::zip(archive_path, source))?;
        if remove.contains(entry.name()) {
            continue;
        }
        writer
            .raw_copy_file(entry)
            .map_err(|source| ArchiveError::zip(tmp_path, source))?;
    }

    writer
        .finish()
        .map_err(|source| ArchiveError::zip(tmp_path, source))?
        .flush()
        .map_err(|source| ArchiveError::io(tmp_path, source))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_image_by_extension() {
        assert!(is_image("001.jpg"));
        assert!(is_image("cover.WEBP"));
        assert!(is_image("page.avif"));
        assert!(!is_image("notes.txt"));
        assert!(!is_image("noext"));
    }

    #[test]
    fn test_is_precompressed_covers_archives_and_media() {
        assert!(is_precompressed("001.png"));
        assert!(is_precompressed("bundle.zip"));
        assert!(is_precompressed("clip.mkv"));
        assert!(!is_precompressed("info.json"));
    }

    #[test]
    fn test_archive_entry_name_uses_forward_slashes() {
        let rel = Path::new("sub").join("001.jpg");
        assert_eq!(archive_entry_name(&rel), "sub/001.jpg");
    }

    #[test]
    fn test_compress_rejects_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();

        let err = compress_dir(&file, &dir.path().join("out.cbz")).unwrap_err();
        assert!(matches!(err, ArchiveError::NotADirectory { .. }));
    }

    #[test]
    fn test_compress_list_and_extract_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let chapter = dir.path().join("Chapter 1");
        std::fs::create_dir_all(chapter.join("extras")).unwrap();
        std::fs::write(chapter.join("001.jpg"), b"\xFF\xD8\xFFjpeg-1").unwrap();
        std::fs::write(chapter.join("002.jpg"), b"\xFF\xD8\xFFjpeg-2").unwrap();
        std::fs::write(chapter.join("extras").join("note.txt"), b"hello").unwrap();

        let archive = dir.path().join("Chapter 1.cbz");
        compress_dir(&chapter, &archive).unwrap();

        assert_eq!(list_images(&archive).unwrap(), vec!["001.jpg", "002.jpg"]);

        let out = dir.path().join("out");
        extract_all(&archive, &out).unwrap();
        assert_eq!(std::fs::read(out.join("001.jpg")).unwrap(), b"\xFF\xD8\xFFjpeg-1");
        assert_eq!(std::fs::read(out.join("002.jpg")).unwrap(), b"\xFF\xD8\xFFjpeg-2");
        assert_eq!(
            std::fs::read(out.join("extras").join("note.txt")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_extract_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let chapter = dir.path().join("ch");
        std::fs::create_dir_all(&chapter).unwrap();
        std::fs::write(chapter.join("001.png"), b"\x89PNGdata").unwrap();

        let archive = dir.path().join("ch.zip");
        compress_dir(&chapter, &archive).unwrap();

        let dest = dir.path().join("nested").join("copy.png");
        extract_entry(&archive, "001.png", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"\x89PNGdata");

        let missing = extract_entry(&archive, "nope.png", &dest).unwrap_err();
        assert!(matches!(missing, ArchiveError::EntryNotFound { .. }));
    }

    #[test]
    fn test_extract_all_rejects_zip_slip_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");

        // Hand-build an archive whose entry escapes the destination.
        let out = File::create(&archive).unwrap();
        let mut writer = ZipWriter::new(out);
        writer
            .start_file("../evil.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"pwn").unwrap();
        writer
            .start_file("ok.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"fine").unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("dest");
        let err = extract_all(&archive, &dest).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafeEntry { name } if name.contains("evil")));

        // Nothing may have been written, not even the safe entry.
        assert!(!dest.exists());
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_delete_entries_removes_only_named() {
        let dir = tempfile::tempdir().unwrap();
        let chapter = dir.path().join("ch");
        std::fs::create_dir_all(&chapter).unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            std::fs::write(chapter.join(name), format!("img-{name}")).unwrap();
        }

        let archive = dir.path().join("ch.cbz");
        compress_dir(&chapter, &archive).unwrap();
        assert_eq!(list_images(&archive).unwrap(), vec!["a.jpg", "b.jpg", "c.jpg"]);

        let cache = ArchiveCache::new(4);
        // Warm the cache so eviction-on-rewrite is exercised.
        cache.read_entry(&archive, "a.jpg").unwrap();

        delete_entries(&cache, &archive, &["b.jpg".to_string()]).unwrap();

        assert_eq!(list_images(&archive).unwrap(), vec!["a.jpg", "c.jpg"]);
        // Survivors are byte-identical and readable immediately.
        assert_eq!(cache.read_entry(&archive, "a.jpg").unwrap(), b"img-a.jpg");
        assert_eq!(cache.read_entry(&archive, "c.jpg").unwrap(), b"img-c.jpg");
        assert!(matches!(
            cache.read_entry(&archive, "b.jpg"),
            Err(ArchiveError::EntryNotFound { .. })
        ));
    }
}
