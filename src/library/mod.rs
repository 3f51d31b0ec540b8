//! Library services: root-path resolution, the `/filemanga` HTTP surface
//! and the on-disk scanner.

mod resolver;
mod scanner;
mod service;

pub use resolver::{AppState, filemanga_router, serve};
pub use scanner::{LibraryScanner, ScanError, ScanSummary, parse_chapter_number};
pub use service::{LibraryError, LibraryService};
