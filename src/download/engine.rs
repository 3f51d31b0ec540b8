//! Worker-pool download engine with adaptive concurrency.
//!
//! `max_concurrency` long-lived workers pull job indices from a shared
//! channel and are gated by a semaphore of the same capacity. The dispatcher
//! reads the [`AdaptiveController`] setpoint after every completion and
//! withholds free permits to shrink the active subset; blocked workers are
//! paused, never killed, and resume when permits are handed back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::adaptive::AdaptiveController;
use super::sniff::detect_ext;
use super::{DownloadConfig, ProgressReport, ProgressStatus};
use crate::fetch::FetchClient;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Output directory could not be created.
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport failure talking to the image host.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The host answered with a non-200 status.
    #[error("bad response {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// The host answered 200 with an empty body.
    #[error("empty body from {url}")]
    EmptyBody { url: String },

    /// Writing the image to disk failed.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The surrounding operation was cancelled.
    #[error("download cancelled")]
    Cancelled,
}

/// Outcome a worker reports for one job.
#[derive(Debug)]
struct WorkerOutcome {
    index: usize,
    success: bool,
}

/// Digit count used to zero-pad page filenames for `total` URLs.
#[must_use]
pub fn pad_width(total: usize) -> usize {
    total.to_string().len()
}

/// Downloads every URL into `cfg.output_dir`, reporting per-completion
/// progress on `progress`.
///
/// Files are named `{paddedIndex}{ext}` where the padding width is the digit
/// count of the URL total and the extension is sniffed from the response.
/// Individual failures are reported as `fail` progress entries and do not
/// abort the batch.
///
/// # Errors
///
/// Returns [`DownloadError::CreateDir`] if the output directory cannot be
/// created, or [`DownloadError::Cancelled`] as soon as `cancel` fires.
#[instrument(skip_all, fields(total = urls.len(), output_dir = %cfg.output_dir.display()))]
pub async fn download_all(
    client: &FetchClient,
    urls: &[String],
    cfg: &DownloadConfig,
    progress: mpsc::Sender<ProgressReport>,
    cancel: CancellationToken,
) -> Result<(), DownloadError> {
    let total = urls.len();
    if total == 0 {
        return Ok(());
    }

    let cfg = cfg.clone().clamped();
    tokio::fs::create_dir_all(&cfg.output_dir)
        .await
        .map_err(|source| DownloadError::CreateDir {
            path: cfg.output_dir.clone(),
            source,
        })?;

    let controller = Arc::new(AdaptiveController::new(
        cfg.start_concurrency,
        cfg.min_concurrency,
        cfg.max_concurrency,
    ));
    let max = cfg.max_concurrency;
    let width = pad_width(total);
    let urls: Arc<Vec<String>> = Arc::new(urls.to_vec());

    let semaphore = Arc::new(Semaphore::new(max));
    // Withhold permits down to the starting setpoint before any worker runs.
    let mut drained: Vec<OwnedSemaphorePermit> = Vec::with_capacity(max);
    rebalance_permits(&semaphore, &mut drained, max, controller.current());

    let (jobs_tx, jobs_rx) = mpsc::channel::<usize>(1);
    let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));
    let (results_tx, mut results_rx) = mpsc::channel::<WorkerOutcome>(total);

    info!(
        total,
        start = cfg.start_concurrency,
        min = cfg.min_concurrency,
        max,
        "starting adaptive download batch"
    );

    // Fixed pool of max workers; the semaphore decides how many are active.
    let mut workers = Vec::with_capacity(max);
    for worker_id in 0..max {
        let jobs_rx = Arc::clone(&jobs_rx);
        let results_tx = results_tx.clone();
        let semaphore = Arc::clone(&semaphore);
        let controller = Arc::clone(&controller);
        let urls = Arc::clone(&urls);
        let client = client.clone();
        let cancel = cancel.clone();
        let output_dir = cfg.output_dir.clone();
        let retry_count = cfg.retry_count;
        let timeout = cfg.timeout;

        workers.push(tokio::spawn(async move {
            loop {
                let index = {
                    let mut rx = jobs_rx.lock().await;
                    rx.recv().await
                };
                let Some(index) = index else { break };

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };

                let basename = format!("{:0width$}", index + 1);
                let start = Instant::now();
                let result = fetch_one(
                    &client,
                    &urls[index],
                    &output_dir,
                    &basename,
                    retry_count,
                    timeout,
                    &cancel,
                )
                .await;
                let latency = start.elapsed();

                controller.add_latency(latency);
                controller.adjust(result.is_ok());
                drop(permit);

                if let Err(error) = &result {
                    warn!(worker_id, index, error = %error, "page download failed");
                }

                if results_tx
                    .send(WorkerOutcome {
                        index,
                        success: result.is_ok(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }
    drop(results_tx);

    // Feeder: sends job indices, aborts on cancellation, closes the channel
    // after the last send so workers drain and exit.
    let feeder_cancel = cancel.clone();
    let feeder = tokio::spawn(async move {
        for index in 0..total {
            tokio::select! {
                () = feeder_cancel.cancelled() => return,
                sent = jobs_tx.send(index) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    });

    // Dispatcher: forwards progress and enforces the adaptive setpoint by
    // draining free permits down to controller.current().
    let mut completed = 0usize;
    let run = async {
        while completed < total {
            let Some(outcome) = results_rx.recv().await else {
                break;
            };
            completed += 1;

            let status = if outcome.success {
                ProgressStatus::Success
            } else {
                ProgressStatus::Fail
            };
            let _ = progress
                .send(ProgressReport {
                    index: completed,
                    total,
                    filename: url_basename(&urls[outcome.index]),
                    status,
                })
                .await;

            let target = controller.current();
            rebalance_permits(&semaphore, &mut drained, max, target);
            debug!(completed, target, withheld = drained.len(), "dispatched completion");
        }
        Ok::<(), DownloadError>(())
    };

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DownloadError::Cancelled),
        res = run => res,
    };

    if result.is_ok() {
        drained.clear();
        let _ = feeder.await;
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(error = %error, "download worker panicked");
            }
        }
        info!(completed, total, "download batch finished");
    }

    result
}

/// Adjusts withheld permits so the semaphore's effective capacity equals
/// `target`: free permits are drained while above it, withheld permits are
/// returned while below it. In-flight permits cannot be reclaimed, so the
/// effective capacity may transiently stay above `target`.
fn rebalance_permits(
    semaphore: &Arc<Semaphore>,
    drained: &mut Vec<OwnedSemaphorePermit>,
    max: usize,
    target: usize,
) {
    while max - drained.len() > target {
        match Arc::clone(semaphore).try_acquire_owned() {
            Ok(permit) => drained.push(permit),
            Err(_) => break,
        }
    }
    while max - drained.len() < target && drained.pop().is_some() {}
}

/// Downloads one URL with a fixed retry budget and writes it to
/// `{output_dir}/{basename}{ext}`.
async fn fetch_one(
    client: &FetchClient,
    url: &str,
    output_dir: &Path,
    basename: &str,
    retry_count: u32,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PathBuf, DownloadError> {
    let attempts = retry_count.max(1);
    let mut last_error = DownloadError::EmptyBody {
        url: url.to_string(),
    };

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let request = client.inner().get(url).timeout(timeout).send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(source) => {
                debug!(url, attempt, error = %source, "transport error");
                last_error = DownloadError::Transport {
                    url: url.to_string(),
                    source,
                };
                continue;
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            debug!(url, attempt, status, "bad response status");
            last_error = DownloadError::HttpStatus {
                url: url.to_string(),
                status,
            };
            continue;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        let body = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            body = response.bytes() => body,
        };
        let body = match body {
            Ok(body) => body,
            Err(source) => {
                last_error = DownloadError::Transport {
                    url: url.to_string(),
                    source,
                };
                continue;
            }
        };

        if body.is_empty() {
            last_error = DownloadError::EmptyBody {
                url: url.to_string(),
            };
            continue;
        }

        let ext = detect_ext(content_type.as_deref(), &body);
        let path = output_dir.join(format!("{basename}{ext}"));
        match tokio::fs::write(&path, &body).await {
            Ok(()) => return Ok(path),
            Err(source) => {
                last_error = DownloadError::Io {
                    path: path.clone(),
                    source,
                };
            }
        }
    }

    Err(last_error)
}

/// Last path segment of a URL for progress display.
fn url_basename(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(segments) = parsed.path_segments() {
            if let Some(last) = segments.filter(|segment| !segment.is_empty()).next_back() {
                return last.to_string();
            }
        }
    }
    url.rsplit('/').next().unwrap_or(url).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_width_matches_digit_count() {
        assert_eq!(pad_width(1), 1);
        assert_eq!(pad_width(9), 1);
        assert_eq!(pad_width(10), 2);
        assert_eq!(pad_width(99), 2);
        assert_eq!(pad_width(100), 3);
    }

    #[test]
    fn test_url_basename_strips_path_and_query() {
        assert_eq!(url_basename("https://ex.com/a/b/page7.jpg"), "page7.jpg");
        assert_eq!(url_basename("https://ex.com/a/page.png?token=1"), "page.png");
        assert_eq!(url_basename("not a url"), "not a url");
    }

    #[test]
    fn test_rebalance_permits_drains_free_capacity() {
        let semaphore = Arc::new(Semaphore::new(8));
        let mut drained = Vec::new();

        rebalance_permits(&semaphore, &mut drained, 8, 3);
        assert_eq!(drained.len(), 5);
        assert_eq!(semaphore.available_permits(), 3);

        // Raising the target hands permits back.
        rebalance_permits(&semaphore, &mut drained, 8, 6);
        assert_eq!(drained.len(), 2);
        assert_eq!(semaphore.available_permits(), 6);
    }

    #[test]
    fn test_rebalance_permits_cannot_reclaim_in_flight() {
        let semaphore = Arc::new(Semaphore::new(4));
        // Simulate three in-flight workers.
        let _busy: Vec<_> = (0..3)
            .map(|_| Arc::clone(&semaphore).try_acquire_owned().unwrap())
            .collect();

        let mut drained = Vec::new();
        rebalance_permits(&semaphore, &mut drained, 4, 1);

        // Only the single free permit could be withheld.
        assert_eq!(drained.len(), 1);
        assert_eq!(semaphore.available_permits(), 0);
    }
}
