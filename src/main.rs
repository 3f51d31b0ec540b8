//! CLI entry point for the mangavault library manager.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mangavault::download::{self, DownloadConfig, ProgressStatus};
use mangavault::library::AppState;
use mangavault::models::CONFIG_MANGA_DIRECTORY;
use mangavault::scrape::{BrowserAdapter, SiteRule};
use mangavault::{
    ArchiveCache, AppEvent, Database, EventBus, FetchClient, LibraryScanner, LibraryService,
    Repositories, Scraper,
};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    match args.command {
        Command::Serve { addr, library } => serve(&args.database, addr, library).await,
        Command::Scan { dir } => scan(&args.database, dir).await,
        Command::Scrape { rule, chapter, url } => scrape(&args.database, &rule, chapter, &url).await,
        Command::Download {
            urls,
            output,
            min_concurrency,
            start_concurrency,
            max_concurrency,
            retry,
            timeout_secs,
        } => {
            let cfg = DownloadConfig {
                min_concurrency,
                start_concurrency,
                max_concurrency,
                retry_count: retry,
                timeout: Duration::from_secs(timeout_secs),
                output_dir: output,
            };
            run_download(urls, cfg).await
        }
        Command::Compress { dir, dest } => compress(dir, dest).await,
    }
}

async fn open_repositories(database: &std::path::Path) -> Result<Repositories> {
    let db = Database::new(database)
        .await
        .with_context(|| format!("failed to open database {}", database.display()))?;
    Ok(Repositories::new(db))
}

async fn serve(
    database: &std::path::Path,
    addr: std::net::SocketAddr,
    library: Option<PathBuf>,
) -> Result<()> {
    let repos = open_repositories(database).await?;

    if let Some(root) = library {
        repos
            .config
            .set(CONFIG_MANGA_DIRECTORY, &root.to_string_lossy())
            .await?;
        info!(root = %root.display(), "library root stored");
    }

    let state = AppState {
        library: Arc::new(LibraryService::new(repos)),
        archives: Arc::new(ArchiveCache::default()),
    };

    // Heartbeat for UI subscribers; the reader shell shows a clock.
    let events = EventBus::new();
    let ticker_events = events.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            ticker_events.publish(AppEvent::Time(chrono::Local::now().to_rfc2822()));
        }
    });

    mangavault::library::serve(addr, state)
        .await
        .context("file resolver server failed")
}

async fn scan(database: &std::path::Path, dir: Option<PathBuf>) -> Result<()> {
    let repos = open_repositories(database).await?;

    let root = match dir {
        Some(dir) => dir,
        None => {
            let service = LibraryService::new(repos.clone());
            service
                .manga_dir()
                .await
                .context("no --dir given and manga_directory is not configured")?
        }
    };

    let events = EventBus::new();
    let mut progress = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            if let AppEvent::ScanProgress(scan) = event {
                info!(
                    manga = %scan.main_title,
                    index = scan.index_manga,
                    total = scan.total_manga,
                    chapters = scan.total_chapters,
                    "scanned"
                );
            }
        }
    });

    let scanner = LibraryScanner::new(repos, events);
    let summary = scanner.scan(&root).await?;
    printer.abort();

    info!(
        manga = summary.manga_seen,
        chapters = summary.chapters_added,
        "scan finished"
    );
    Ok(())
}

async fn scrape(database: &std::path::Path, rule: &str, chapter: bool, url: &str) -> Result<()> {
    let rule_path = PathBuf::from(rule);
    let site_rule: SiteRule = if rule_path.is_file() {
        let json = std::fs::read_to_string(&rule_path)
            .with_context(|| format!("failed to read rule file {}", rule_path.display()))?;
        serde_json::from_str(&json).context("invalid rule JSON")?
    } else {
        let repos = open_repositories(database).await?;
        let Some(record) = repos.scraping_rule.get_by_site_key(rule).await? else {
            bail!("no stored rule with site key {rule:?}");
        };
        let json = if chapter {
            &record.chapter_rule_json
        } else {
            &record.manga_rule_json
        };
        serde_json::from_str(json).context("stored rule JSON is invalid")?
    };

    let browser = Arc::new(BrowserAdapter::new(false));
    let renderer: Arc<dyn mangavault::scrape::PageRenderer> = browser.clone();
    let scraper = Scraper::with_renderer(FetchClient::new(), renderer);

    let result = scraper.scrape(&site_rule, url).await;
    browser.cleanup().await;

    let fields = result?;
    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}

async fn run_download(urls_file: Option<PathBuf>, cfg: DownloadConfig) -> Result<()> {
    let input = match urls_file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            if io::stdin().is_terminal() {
                bail!("no --urls file given and stdin is a terminal");
            }
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let urls: Vec<String> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect();
    if urls.is_empty() {
        bail!("no URLs to download");
    }

    let bar = ProgressBar::new(urls.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<mangavault::download::ProgressReport>(16);
    let reporter_bar = bar.clone();
    let events = EventBus::new();
    let reporter = tokio::spawn(async move {
        let mut failed = 0usize;
        while let Some(report) = rx.recv().await {
            if report.status == ProgressStatus::Fail {
                failed += 1;
                reporter_bar.set_message(format!("{} failed ({failed})", report.filename));
            } else {
                reporter_bar.set_message(report.filename.clone());
            }
            reporter_bar.set_position(report.index as u64);
            // Mirrored onto the UI channel for any attached shell.
            events.publish(AppEvent::DownloadProgress(report));
        }
        failed
    });

    let client = FetchClient::with_timeout(cfg.timeout);
    let cancel = CancellationToken::new();

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling downloads");
            ctrl_c_cancel.cancel();
        }
    });

    download::download_all(&client, &urls, &cfg, tx, cancel).await?;
    let failed = reporter.await.unwrap_or(0);
    bar.finish();

    if failed > 0 {
        warn!(failed, total = urls.len(), "download finished with failures");
    } else {
        info!(total = urls.len(), "download finished");
    }
    Ok(())
}

async fn compress(dir: PathBuf, dest: Option<PathBuf>) -> Result<()> {
    let dest = dest.unwrap_or_else(|| {
        let mut name = dir.as_os_str().to_os_string();
        name.push(".cbz");
        PathBuf::from(name)
    });

    let task_dir = dir.clone();
    let task_dest = dest.clone();
    tokio::task::spawn_blocking(move || mangavault::archive::compress_dir(&task_dir, &task_dest))
        .await
        .context("compression task failed")??;

    info!(archive = %dest.display(), "chapter compressed");
    Ok(())
}
