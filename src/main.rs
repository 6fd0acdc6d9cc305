//! Forum-Harvest main entry point
//!
//! This is the command-line interface for the incremental forum harvester.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use forum_harvest::config::{load_config_with_hash, Config};
use forum_harvest::crawler::{build_http_client, Harvester, RunParams, RunScheduler};
use forum_harvest::dispatch::{
    redispatch_pending, AnalysisDispatcher, DispatchWorkers, LogDispatcher, QueueDispatcher,
    TriggerRules, WebhookHandler, WorkerSettings,
};
use forum_harvest::output::{load_statistics, print_statistics};
use forum_harvest::storage::{open_store, KeywordSource, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Forum-Harvest: incremental forum ingestion
///
/// Forum-Harvest pages through a forum listing on a schedule, stores every
/// new post exactly once and hands interesting posts to an analysis service.
#[derive(Parser, Debug)]
#[command(name = "forum-harvest")]
#[command(version = "1.0.0")]
#[command(about = "Incremental forum harvester", long_about = None)]
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

    /// Run a single harvest and exit instead of following the schedule
    #[arg(long)]
    once: bool,

    /// First listing page for --once (defaults to the configured start page)
    #[arg(long, requires = "once", value_parser = clap::value_parser!(u32).range(1..))]
    start_page: Option<u32>,

    /// Page budget for --once (defaults to the configured max pages)
    #[arg(long, requires = "once", value_parser = clap::value_parser!(u32).range(1..))]
    max_pages: Option<u32>,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["once", "list_keywords", "add_keyword", "remove_keyword", "redispatch_days"])]
    stats: bool,

    /// List trigger keywords and exit
    #[arg(long, conflicts_with_all = ["once", "add_keyword", "remove_keyword", "redispatch_days"])]
    list_keywords: bool,

    /// Add a trigger keyword and exit
    #[arg(long, value_name = "KEYWORD", conflicts_with_all = ["once", "remove_keyword", "redispatch_days"])]
    add_keyword: Option<String>,

    /// Remove a trigger keyword and exit
    #[arg(long, value_name = "KEYWORD", conflicts_with_all = ["once", "redispatch_days"])]
    remove_keyword: Option<String>,

    /// Re-evaluate unanalyzed records from the last N days, dispatch hits and exit
    #[arg(long, value_name = "DAYS", conflicts_with = "once")]
    redispatch_days: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let store = open_configured_store(&config)?;
    if cli.seeds_keywords() {
        seed_default_keywords(&config, &store)?;
    }

    // Handle different modes
    if cli.stats {
        handle_stats(&config, store.as_ref())
    } else if cli.list_keywords {
        handle_list_keywords(store.as_ref())
    } else if let Some(keyword) = &cli.add_keyword {
        handle_add_keyword(store.as_ref(), keyword)
    } else if let Some(keyword) = &cli.remove_keyword {
        handle_remove_keyword(store.as_ref(), keyword)
    } else if let Some(days) = cli.redispatch_days {
        handle_redispatch(&config, store, days).await
    } else if cli.once {
        let params = RunParams {
            start_page: cli.start_page.unwrap_or(config.crawler.start_page),
            max_pages: cli.max_pages.unwrap_or(config.crawler.max_pages),
        };
        handle_once(&config, &config_hash, store, params).await
    } else {
        handle_schedule(&config, &config_hash, store).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("forum_harvest=info,warn"),
            1 => EnvFilter::new("forum_harvest=debug,info"),
            2 => EnvFilter::new("forum_harvest=trace,debug"),
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

impl Cli {
    /// Modes that harvest or dispatch need the default keywords present
    ///
    /// Inspection and keyword management leave the keyword table as it is,
    /// so a removed default stays removed until the next harvest.
    fn seeds_keywords(&self) -> bool {
        !(self.stats
            || self.list_keywords
            || self.add_keyword.is_some()
            || self.remove_keyword.is_some())
    }
}

/// Opens the SQLite store
fn open_configured_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let path = Path::new(&config.storage.database_path);
    let store = open_store(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Adds any configured default keyword missing from the store
fn seed_default_keywords(config: &Config, store: &SqliteStore) -> Result<()> {
    let added = store
        .ensure_keywords(&config.trigger.default_keywords)
        .context("failed to seed default keywords")?;
    if added > 0 {
        tracing::info!(added, "Seeded default trigger keywords");
    }
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config, store: &SqliteStore) -> Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let stats = load_statistics(store)?;
    print_statistics(&stats);

    Ok(())
}

fn handle_list_keywords(store: &SqliteStore) -> Result<()> {
    let keywords = store.list_keywords()?;
    if keywords.is_empty() {
        println!("No trigger keywords configured.");
    }
    for keyword in keywords {
        println!("{}", keyword);
    }
    Ok(())
}

fn handle_add_keyword(store: &SqliteStore, keyword: &str) -> Result<()> {
    let keyword = keyword.trim();
    anyhow::ensure!(!keyword.is_empty(), "keyword must not be empty");

    if store.add_keyword(keyword)? {
        println!("Added keyword: {}", keyword);
    } else {
        println!("Keyword already present: {}", keyword);
    }
    Ok(())
}

fn handle_remove_keyword(store: &SqliteStore, keyword: &str) -> Result<()> {
    if store.remove_keyword(keyword.trim())? {
        println!("Removed keyword: {}", keyword.trim());
    } else {
        println!("Keyword not found: {}", keyword.trim());
    }
    Ok(())
}

/// Builds the dispatcher for the configured analysis endpoint
///
/// Without an endpoint, dispatches are only logged and no workers run.
fn build_dispatcher(
    config: &Config,
    store: Arc<SqliteStore>,
    shutdown: &CancellationToken,
) -> Result<(Arc<dyn AnalysisDispatcher>, Option<DispatchWorkers>)> {
    let Some(dispatch) = &config.dispatch else {
        return Ok((Arc::new(LogDispatcher), None));
    };
    let Some(endpoint) = &dispatch.endpoint else {
        return Ok((Arc::new(LogDispatcher), None));
    };

    let client = build_http_client(&config.site.user_agent, Duration::from_secs(60))
        .context("failed to build analysis HTTP client")?;
    let handler = Arc::new(WebhookHandler::new(client, endpoint.clone()));
    let (dispatcher, workers) = QueueDispatcher::spawn(
        store,
        handler,
        WorkerSettings::from(dispatch),
        shutdown.child_token(),
    );

    Ok((Arc::new(dispatcher), Some(workers)))
}

/// Cancels `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            token.cancel();
        }
    });
}

/// Handles --redispatch-days: re-evaluates recent unanalyzed records
async fn handle_redispatch(config: &Config, store: Arc<SqliteStore>, days: u32) -> Result<()> {
    let shutdown = CancellationToken::new();
    let (dispatcher, workers) = build_dispatcher(config, Arc::clone(&store), &shutdown)?;
    cancel_on_ctrl_c(shutdown.clone());

    let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
    let dispatched = redispatch_pending(
        store.as_ref(),
        store.as_ref(),
        &TriggerRules::from(&config.trigger),
        dispatcher.as_ref(),
        cutoff,
    )?;
    println!("Dispatched {} record(s) for analysis", dispatched);

    // Let the workers drain the queue
    drop(dispatcher);
    if let Some(workers) = workers {
        workers.join().await;
    }
    Ok(())
}

/// Handles --once: a single harvest run
async fn handle_once(
    config: &Config,
    config_hash: &str,
    store: Arc<SqliteStore>,
    params: RunParams,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let (dispatcher, workers) = build_dispatcher(config, Arc::clone(&store), &shutdown)?;
    cancel_on_ctrl_c(shutdown.clone());

    let harvester = Harvester::new(config, store.clone(), store, dispatcher)?;
    let result = harvester.run_recorded(params, config_hash, &shutdown).await;

    // Let the workers drain the queue
    drop(harvester);
    if let Some(workers) = workers {
        workers.join().await;
    }

    match result {
        Ok(summary) => {
            println!("{}", summary);
            Ok(())
        }
        Err(e) => {
            println!("{}", e.summary);
            Err(e.into())
        }
    }
}

/// Handles the default mode: recurring runs until Ctrl-C
async fn handle_schedule(
    config: &Config,
    config_hash: &str,
    store: Arc<SqliteStore>,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let (dispatcher, workers) = build_dispatcher(config, Arc::clone(&store), &shutdown)?;
    cancel_on_ctrl_c(shutdown.clone());

    let harvester = Arc::new(Harvester::new(config, store.clone(), store, dispatcher)?);
    let params = RunParams::from(&config.crawler);
    let config_hash = config_hash.to_string();

    let scheduler = RunScheduler::new(&config.schedule);
    let report = scheduler
        .run(
            |token| {
                let harvester = Arc::clone(&harvester);
                let config_hash = config_hash.clone();
                async move { harvester.run_recorded(params, &config_hash, &token).await }
            },
            shutdown.clone(),
        )
        .await;

    tracing::info!(
        runs = report.started,
        failed = report.failed,
        "Harvester stopped"
    );

    drop(harvester);
    if let Some(workers) = workers {
        workers.join().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let argv = ["forum-harvest", "harvest.toml"].into_iter().chain(args.iter().copied());
        Cli::parse_from(argv)
    }

    #[test]
    fn test_read_only_modes_do_not_seed_keywords() {
        assert!(!cli(&["--stats"]).seeds_keywords());
        assert!(!cli(&["--list-keywords"]).seeds_keywords());
        assert!(!cli(&["--add-keyword", "黑屏"]).seeds_keywords());
        assert!(!cli(&["--remove-keyword", "蓝屏"]).seeds_keywords());
    }

    #[test]
    fn test_run_modes_seed_keywords() {
        assert!(cli(&[]).seeds_keywords());
        assert!(cli(&["--once", "--max-pages", "2"]).seeds_keywords());
        assert!(cli(&["--redispatch-days", "3"]).seeds_keywords());
    }

    #[test]
    fn test_page_flags_require_once() {
        let parse = |args: &[&str]| {
            let argv = ["forum-harvest", "harvest.toml"].into_iter().chain(args.iter().copied());
            Cli::try_parse_from(argv)
        };
        assert!(parse(&["--start-page", "2"]).is_err());
        assert!(parse(&["--once", "--max-pages", "0"]).is_err());
        assert!(parse(&["--once", "--start-page", "4294967295"]).is_ok());
    }
}
