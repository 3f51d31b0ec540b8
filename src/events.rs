//! Broadcast channel of UI-facing events.
//!
//! The pipeline publishes progress here; the desktop shell (or any other
//! subscriber) consumes the stream. Publishing never blocks and never fails:
//! events with no subscribers are dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::download::ProgressReport;
use crate::models::Manga;

/// Default capacity of the broadcast buffer.
const DEFAULT_CAPACITY: usize = 256;

/// Progress of a library scan, emitted once per processed manga.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    #[serde(rename = "mainTitle")]
    pub main_title: String,
    #[serde(rename = "indexManga")]
    pub index_manga: usize,
    #[serde(rename = "totalManga")]
    pub total_manga: usize,
    #[serde(rename = "totalChapters")]
    pub total_chapters: usize,
}

/// An event published to the UI collaborator channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum AppEvent {
    #[serde(rename = "downloadProgress")]
    DownloadProgress(ProgressReport),
    #[serde(rename = "scanProgress")]
    ScanProgress(ScanProgress),
    #[serde(rename = "mangaSaved")]
    MangaSaved(Manga),
    #[serde(rename = "time")]
    Time(String),
}

/// Cloneable publisher handle over a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Publishes an event, dropping it if nobody is subscribed.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}
