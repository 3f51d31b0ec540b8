//! HTTP file resolver for the reader UI.
//!
//! `GET /filemanga/<manga>/<chapter>/<page>` resolves transparently from an
//! expanded chapter directory or the corresponding `.cbz`/`.zip` archive,
//! with a cover-image fallback search. Responses are cacheable for an hour;
//! direct file serving honours HTTP ranges.

use std::net::SocketAddr;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::services::ServeFile;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::service::LibraryService;
use crate::archive::{ArchiveCache, ArchiveError, is_image};

/// Cover candidates probed before falling back to the first image found.
const COVER_CANDIDATES: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "cover.gif",
    "cover.bmp",
    "cover.webp",
];

/// Shared state of the file resolver.
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<LibraryService>,
    pub archives: Arc<ArchiveCache>,
}

/// Builds the `/filemanga` router.
#[must_use]
pub fn filemanga_router(state: AppState) -> Router {
    Router::new()
        .route("/filemanga/*path", get(serve_request))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves the resolver until the task is aborted.
///
/// # Errors
///
/// Returns the bind or serve error.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "file resolver listening");
    axum::serve(listener, filemanga_router(state)).await
}

#[instrument(skip(state, request), fields(path = %rel_path))]
async fn serve_request(
    State(state): State<AppState>,
    Path(rel_path): Path<String>,
    request: Request,
) -> Response {
    let root = match state.library.manga_dir().await {
        Ok(root) => root,
        Err(error) => {
            warn!(%error, "library root unavailable");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Directory-traversal defence: only plain path segments, and the joined
    // path must stay under the library root.
    let rel = PathBuf::from(&rel_path);
    if rel
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return StatusCode::FORBIDDEN.into_response();
    }
    let full = root.join(&rel);
    if !full.starts_with(&root) {
        return StatusCode::FORBIDDEN.into_response();
    }

    // 1. Expanded directory: the file exists as-is.
    if is_file(&full).await {
        return serve_path(&full, request).await;
    }

    let Some(dir) = full.parent().map(FsPath::to_path_buf) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let name = full
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    // 2. Compressed chapter: probe `<dir>.cbz` then `<dir>.zip`.
    for ext in ["cbz", "zip"] {
        let archive = sibling_archive(&dir, ext);
        if !is_file(&archive).await {
            continue;
        }
        match read_archive_entry(&state.archives, archive.clone(), name.clone()).await {
            Ok(bytes) => return archive_entry_response(&name, bytes),
            Err(ArchiveError::EntryNotFound { .. }) => {
                debug!(archive = %archive.display(), entry = %name, "entry not in archive");
            }
            Err(error) => {
                warn!(archive = %archive.display(), %error, "archive read failed");
                return StatusCode::NOT_FOUND.into_response();
            }
        }
    }

    // 3. Cover fallback.
    if name.eq_ignore_ascii_case("cover") || name.eq_ignore_ascii_case("cover.webp") {
        if let Some(found) = find_cover(dir.clone()).await {
            debug!(resolved = %found.display(), "cover fallback hit");
            return serve_path(&found, request).await;
        }
    }

    StatusCode::NOT_FOUND.into_response()
}

async fn is_file(path: &FsPath) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// `<root>/<Manga>/<Chapter>` becomes `<root>/<Manga>/<Chapter>.<ext>`.
fn sibling_archive(dir: &FsPath, ext: &str) -> PathBuf {
    let mut name = dir.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

async fn read_archive_entry(
    cache: &Arc<ArchiveCache>,
    archive: PathBuf,
    name: String,
) -> Result<Vec<u8>, ArchiveError> {
    let cache = Arc::clone(cache);
    let display = archive.clone();
    match tokio::task::spawn_blocking(move || cache.read_entry(&archive, &name)).await {
        Ok(result) => result,
        Err(join_error) => Err(ArchiveError::io(
            display,
            std::io::Error::other(join_error.to_string()),
        )),
    }
}

fn archive_entry_response(name: &str, bytes: Vec<u8>) -> Response {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    let Ok(content_type) = HeaderValue::from_str(mime.as_ref()) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    ([(header::CONTENT_TYPE, content_type)], Body::from(bytes)).into_response()
}

/// Serves a file with Content-Type from its extension and HTTP range
/// support.
async fn serve_path(path: &FsPath, request: Request) -> Response {
    match ServeFile::new(path).try_call(request).await {
        Ok(response) => response.map(Body::new),
        Err(error) => {
            warn!(path = %path.display(), %error, "file serve failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Cover search: explicit cover files, then the first image directly in the
/// chapter directory, then the first image anywhere below it.
async fn find_cover(dir: PathBuf) -> Option<PathBuf> {
    tokio::task::spawn_blocking(move || {
        for candidate in COVER_CANDIDATES {
            let path = dir.join(candidate);
            if path.is_file() {
                return Some(path);
            }
        }

        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && is_image(&entry.file_name().to_string_lossy()) {
                    return Some(path);
                }
            }
        }

        for entry in WalkDir::new(&dir).into_iter().flatten() {
            if entry.file_type().is_file() && is_image(&entry.file_name().to_string_lossy()) {
                return Some(entry.into_path());
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
