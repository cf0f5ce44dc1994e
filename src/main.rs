//! gallery-crawler main entry point
//!
//! This is the command-line interface for the incremental gallery crawler.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use gallery_crawler::archive::archive_older_than;
use gallery_crawler::config::{load_config_with_hash, Config};
use gallery_crawler::crawler::{crawl, StopSignal};
use gallery_crawler::output::{load_statistics, print_statistics};
use gallery_crawler::storage::open_storage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// gallery-crawler: incremental crawl-and-persist for paginated forum boards
///
/// Walks the listing pages of one gallery, enriches every post with its
/// body, images and comments, and keeps a SQLite database up to date
/// across repeated runs.
#[derive(Parser, Debug)]
#[command(name = "gallery-crawler")]
#[command(version)]
#[command(about = "Incremental gallery crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Crawl this listing URL instead of the configured base URL
    #[arg(long, value_name = "URL")]
    target: Option<String>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "archive"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "archive"])]
    stats: bool,

    /// Archive posts older than the configured age and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    archive: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(target) = cli.target {
        url::Url::parse(&target).with_context(|| format!("Invalid target URL {}", target))?;
        config.gallery.base_url = target;
    }

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.archive {
        handle_archive(&config)?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gallery_crawler=info,warn"),
            1 => EnvFilter::new("gallery_crawler=debug,info"),
            2 => EnvFilter::new("gallery_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== gallery-crawler Dry Run ===\n");

    println!("Gallery:");
    println!("  Base URL: {}", config.gallery.base_url);
    println!("  Max pages: {}", config.gallery.max_pages);
    println!("  Minimum post number: {}", config.gallery.min_post_id);

    println!("\nRequests:");
    println!("  User agent: {}", config.request.user_agent);
    if !config.request.referer.is_empty() {
        println!("  Referer: {}", config.request.referer);
    }
    println!("  Timeout: {}s", config.request.timeout_secs);
    println!(
        "  Delay between posts: {}-{}ms",
        config.request.delay_min_ms, config.request.delay_max_ms
    );
    println!("  Minimum request interval: {}ms", config.request.min_interval_ms);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Images: {}", config.output.images_dir);
    println!("  Archive: {}", config.output.archive_dir);
    println!("  Archive posts older than: {} days", config.archive.max_age_days);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let stats = load_statistics(&storage).context("Failed to load statistics")?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --archive mode
fn handle_archive(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let storage = Mutex::new(storage);

    let report = archive_older_than(
        &storage,
        Path::new(&config.output.images_dir),
        Path::new(&config.output.archive_dir),
        config.archive.max_age_days,
        Utc::now(),
    )
    .context("Archival failed")?;

    println!(
        "Archived {} posts to {} ({} failed, {} without a readable date)",
        report.archived.len(),
        config.output.archive_dir,
        report.failed,
        report.undated
    );

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let stop = StopSignal::new();

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current post");
            ctrl_c_stop.request_stop();
        }
    });

    let summary = crawl(config, stop).await.context("Crawl failed")?;

    println!(
        "Crawl {}: {} pages, {} posts ({} new, {} updated, {} unchanged, {} failed)",
        summary.status,
        summary.pages_visited,
        summary.total_processed,
        summary.inserted,
        summary.updated,
        summary.unchanged,
        summary.failed
    );

    Ok(())
}
