//! Adaptive concurrent image downloader.
//!
//! A bounded worker pool downloads chapter page images; a latency-driven
//! controller continuously adjusts how many workers may be in flight by
//! withholding semaphore permits. Workers are never killed, only paused on
//! their next permit acquisition.
//!
//! # Example
//!
//! ```no_run
//! use mangavault::download::{download_all, DownloadConfig};
//! use mangavault::FetchClient;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FetchClient::new();
//! let cfg = DownloadConfig::new("./images".into());
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//! tokio::spawn(async move {
//!     while let Some(report) = rx.recv().await {
//!         println!("{}/{} {}", report.index, report.total, report.filename);
//!     }
//! });
//! let urls = vec!["https://ex/page1.jpg".to_string()];
//! download_all(&client, &urls, &cfg, tx, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod adaptive;
mod engine;
mod sniff;

pub use adaptive::AdaptiveController;
pub use engine::{DownloadError, download_all, pad_width};
pub use sniff::{detect_ext, ext_from_content_type, ext_from_magic};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default minimum concurrency.
pub const DEFAULT_MIN_CONCURRENCY: usize = 2;
/// Default starting concurrency.
pub const DEFAULT_START_CONCURRENCY: usize = 4;
/// Default maximum concurrency.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
/// Default retry attempts per URL.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Configuration for one chapter download run.
///
/// Invariant: `min_concurrency <= start_concurrency <= max_concurrency`,
/// enforced by [`DownloadConfig::clamped`].
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub min_concurrency: usize,
    pub start_concurrency: usize,
    pub max_concurrency: usize,
    pub retry_count: u32,
    pub timeout: Duration,
    pub output_dir: PathBuf,
}

impl DownloadConfig {
    /// Creates a config with default tuning for the given output directory.
    #[must_use]
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            min_concurrency: DEFAULT_MIN_CONCURRENCY,
            start_concurrency: DEFAULT_START_CONCURRENCY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry_count: DEFAULT_RETRY_COUNT,
            timeout: Duration::from_secs(30),
            output_dir,
        }
    }

    /// Returns a copy with concurrency bounds forced into a valid order.
    ///
    /// `max` is raised to at least `min`, then `start` is clamped into
    /// `[min, max]`. A zero `min` becomes 1.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.min_concurrency = self.min_concurrency.max(1);
        self.max_concurrency = self.max_concurrency.max(self.min_concurrency);
        self.start_concurrency = self
            .start_concurrency
            .clamp(self.min_concurrency, self.max_concurrency);
        self
    }
}

/// Status of one completed download attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Success,
    Fail,
}

/// Progress of a download batch, emitted once per completed URL.
///
/// `index` is the completion count so far (1-based), not the job index;
/// completion order is not submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub index: usize,
    pub total: usize,
    pub filename: String,
    pub status: ProgressStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_clamped_orders_bounds() {
        let cfg = DownloadConfig {
            min_concurrency: 4,
            start_concurrency: 1,
            max_concurrency: 2,
            ..DownloadConfig::new("/tmp".into())
        }
        .clamped();

        assert!(cfg.min_concurrency <= cfg.start_concurrency);
        assert!(cfg.start_concurrency <= cfg.max_concurrency);
    }

    #[test]
    fn test_config_clamped_zero_min_becomes_one() {
        let cfg = DownloadConfig {
            min_concurrency: 0,
            start_concurrency: 0,
            max_concurrency: 0,
            ..DownloadConfig::new("/tmp".into())
        }
        .clamped();

        assert_eq!(cfg.min_concurrency, 1);
        assert_eq!(cfg.start_concurrency, 1);
        assert_eq!(cfg.max_concurrency, 1);
    }

    #[test]
    fn test_progress_report_serializes_status_lowercase() {
        let report = ProgressReport {
            index: 1,
            total: 3,
            filename: "001.jpg".to_string(),
            status: ProgressStatus::Success,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
    }
}
