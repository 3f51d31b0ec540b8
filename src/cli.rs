//! CLI argument definitions using clap derive macros.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manga library manager: rule-driven scraping, adaptive image downloads
/// and a local reading library.
#[derive(Parser, Debug)]
#[command(name = "mangavault")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the library database
    #[arg(long, global = true, default_value = "mangavault.db")]
    pub database: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the library file resolver HTTP server
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8477")]
        addr: SocketAddr,

        /// Set the library root before serving (stored in config)
        #[arg(long)]
        library: Option<PathBuf>,
    },

    /// Synchronize the database with the on-disk library
    Scan {
        /// Library root; defaults to the configured manga directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Run a scraping rule against a URL or id and print the result
    Scrape {
        /// Site key of a stored rule, or path to a rule JSON file
        #[arg(long)]
        rule: String,

        /// Use the stored chapter rule instead of the manga rule
        #[arg(long)]
        chapter: bool,

        /// Override URL or bare id
        url: String,
    },

    /// Download a list of image URLs into a chapter directory
    Download {
        /// File with one image URL per line (stdin when absent)
        #[arg(long)]
        urls: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Minimum concurrency
        #[arg(long, default_value_t = 2)]
        min_concurrency: usize,

        /// Starting concurrency
        #[arg(long, default_value_t = 4)]
        start_concurrency: usize,

        /// Maximum concurrency (worker count)
        #[arg(long, default_value_t = 8)]
        max_concurrency: usize,

        /// Retry attempts per URL
        #[arg(long, default_value_t = 3)]
        retry: u32,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Compress a chapter directory into a CBZ archive
    Compress {
        /// Chapter directory
        dir: PathBuf,

        /// Destination archive; defaults to `<dir>.cbz`
        dest: Option<PathBuf>,
    },
}
