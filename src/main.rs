//! Sumi-Sieve main entry point
//!
//! This is the command-line interface for the Sumi-Sieve crawl engine.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_sieve::config::{load_config_with_hash, Config, Engine};
use sumi_sieve::crawler::Coordinator;
use sumi_sieve::output::{load_statistics, print_statistics};
use sumi_sieve::storage::{RunStatus, SqliteLedger};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Sieve: a browser-driven crawl engine
///
/// Sumi-Sieve renders pages through a pool of headless browser sessions,
/// extracts structured records and QR payloads, and appends every distinct
/// record to a durable JSON-lines log.
#[derive(Parser, Debug)]
#[command(name = "sumi-sieve")]
#[command(version)]
#[command(about = "A browser-driven crawl engine", long_about = None)]
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

    /// Discard the saved frontier instead of resuming it
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the ledger and record log and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_sieve=info,warn"),
            1 => EnvFilter::new("sumi_sieve=debug,info"),
            2 => EnvFilter::new("sumi_sieve=trace,debug"),
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
    println!("=== Sumi-Sieve Dry Run ===\n");

    println!("Crawler:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Task timeout: {}ms", config.crawler.task_timeout_ms);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Backoff: {}ms base, x{}, capped at {}ms, jitter {}",
        config.backoff.base_ms,
        config.backoff.multiplier,
        config.backoff.max_ms,
        config.backoff.jitter
    );

    println!("\nBrowser:");
    let engine = match config.browser.engine {
        Engine::Chromium => "chromium",
        Engine::Http => "http",
    };
    println!("  Engine: {}", engine);
    println!("  Pool size: {}", config.browser.pool_size);
    println!("  Acquire timeout: {}ms", config.browser.acquire_timeout_ms);
    println!("  User agents: {}", config.browser.user_agents.len());

    println!("\nScope:");
    println!("  Allow: {:?}", config.scope.allow);
    println!("  Deny: {:?}", config.scope.deny);

    println!("\nExtraction:");
    match &config.extraction.record_selector {
        Some(selector) => println!("  Records: each match of '{}'", selector),
        None => println!("  Records: one per page"),
    }
    for field in &config.extraction.fields {
        println!(
            "  - {} <- '{}'{}{}",
            field.name,
            field.selector,
            field
                .attr
                .as_ref()
                .map(|a| format!(" @{}", a))
                .unwrap_or_default(),
            if field.required { " (required)" } else { "" }
        );
    }
    println!(
        "  Images: up to {} per page, {} bytes each",
        config.extraction.max_images, config.extraction.max_image_bytes
    );

    println!("\nOutput:");
    println!("  Record log: {}", config.output.log_path);
    println!("  Artifacts: {}", config.output.artifact_dir);
    println!("  Ledger: {}", config.output.ledger_path);
    if let Some(status) = &config.output.status_path {
        println!(
            "  Status file: {} (every {}ms)",
            status, config.output.status_interval_ms
        );
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the ledger and record log
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Ledger: {}", config.output.ledger_path);
    println!("Record log: {}\n", config.output.log_path);

    let ledger = SqliteLedger::new(Path::new(&config.output.ledger_path))
        .with_context(|| format!("Failed to open ledger {}", config.output.ledger_path))?;
    let stats = load_statistics(
        &ledger,
        Path::new(&config.output.log_path),
        Path::new(&config.output.artifact_dir),
    )?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (saved frontier discarded)");
    } else {
        tracing::info!("Starting crawl (will resume a saved frontier)");
    }
    tracing::info!("Seed locators: {}", config.seeds.len());

    let coordinator =
        Coordinator::new(config, config_hash, fresh).context("Failed to set up the crawl")?;
    setup_shutdown_handler(coordinator.cancellation_token());

    let report = coordinator.run().await.context("Crawl failed")?;
    match report.status {
        RunStatus::Interrupted => println!(
            "Run {} interrupted; {} tasks saved for the next run",
            report.run_id, report.frontier_saved
        ),
        _ => println!(
            "Run {} complete: {} records admitted, {} duplicates, {} permanent failures",
            report.run_id,
            report.snapshot.records_admitted,
            report.snapshot.duplicates_discarded,
            report.snapshot.permanent_failures
        ),
    }

    Ok(())
}

/// First Ctrl+C stops the crawl and saves the frontier. Second Ctrl+C exits immediately.
fn setup_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl+C, stopping workers and saving the frontier...");
            eprintln!("Press Ctrl+C again to force quit");
            cancel.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nForce quit requested, exiting immediately...");
                std::process::exit(1);
            }
        }
    });
}
