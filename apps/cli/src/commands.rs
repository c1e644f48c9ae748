//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use feeddigest_core::{Pipeline, ProgressReporter, RunReport};
use feeddigest_feeds::FeedFetcher;
use feeddigest_llm::OpenAiBackend;
use feeddigest_render::DigestWriter;
use feeddigest_shared::{
    AppConfig, FetchConfig, PipelineConfig, init_config, init_config_at, load_config,
    load_config_from, validate_api_key,
};
use feeddigest_storage::{SeenStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// feeddigest: a daily digest of the feeds you follow.
#[derive(Parser)]
#[command(
    name = "feeddigest",
    version,
    about = "Fetch RSS/Atom feeds, filter them by interest, and write a summarized digest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.feeddigest/feeddigest.toml).
    #[arg(long, global = true, env = "FEEDDIGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch all feeds and write today's digest.
    Run {
        /// Hide the progress spinner.
        #[arg(long)]
        quiet: bool,
    },

    /// Forget seen articles older than the retention window.
    Prune {
        /// Age in days; defaults to `store.retention_days`.
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show seen-store size and recent runs.
    Stats {
        /// Number of runs to list.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "feeddigest=info",
        1 => "feeddigest=debug",
        _ => "feeddigest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Run { quiet } => cmd_run(config_path.as_deref(), quiet).await,
        Command::Prune { days } => cmd_prune(config_path.as_deref(), days).await,
        Command::Stats { limit } => cmd_stats(config_path.as_deref(), limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path.as_deref()).await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, quiet: bool) -> Result<()> {
    // Every config problem surfaces here, before any feed is fetched
    let app = load(config_path)?;
    let pipeline_config = Arc::new(PipelineConfig::from_app(&app)?);
    let fetch_config = FetchConfig::from_app(&app)?;
    let api_key = validate_api_key(&app)?;

    let backend = Arc::new(OpenAiBackend::from_config(&app.llm, api_key)?);
    let fetcher = Arc::new(FeedFetcher::new(fetch_config)?);
    let writer = DigestWriter::new(&pipeline_config.output_base, pipeline_config.output_format);

    let store = SeenStore::open(&pipeline_config.store_path, pipeline_config.fail_open).await;
    if let Some(days) = pipeline_config.retention_days {
        prune_store(&store, days).await;
    }

    let run_id = match store.storage() {
        Some(storage) => match storage.insert_run().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not record run start");
                None
            }
        },
        None => None,
    };

    let reporter: Box<dyn ProgressReporter> = if quiet {
        Box::new(feeddigest_core::SilentProgress)
    } else {
        Box::new(CliProgress::new())
    };

    reporter.phase("Fetching feeds");
    let fetched = fetcher.fetch_all().await;

    let pipeline = Pipeline::new(pipeline_config.clone(), backend.clone(), backend)
        .with_expander(fetcher);
    let report = pipeline.run(fetched.articles, &store, reporter.as_ref()).await;

    let written = writer.write(&report.digest)?;

    if let (Some(storage), Some(id)) = (store.storage(), run_id.as_deref()) {
        let record = serde_json::json!({
            "stats": report.stats,
            "failed_feeds": fetched.failures.iter().map(|f| &f.feed).collect::<Vec<_>>(),
            "output": written.as_ref().map(|p| p.display().to_string()),
        });
        if let Err(e) = storage.finish_run(id, &record.to_string()).await {
            warn!(error = %e, "could not record run result");
        }
    }

    print_run_summary(&report, fetched.failures.len(), written.as_deref());
    Ok(())
}

async fn prune_store(store: &SeenStore, days: u32) {
    let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
    match store.prune(cutoff).await {
        Ok(removed) => info!(removed, days, "pruned seen store"),
        Err(e) => warn!(error = %e, "seen store prune failed"),
    }
}

fn print_run_summary(report: &RunReport, failed_feeds: usize, written: Option<&Path>) {
    let stats = &report.stats;
    println!();
    println!("  Digest run complete");
    println!("  Fetched:   {} articles ({failed_feeds} feeds failed)", stats.fetched);
    println!("  New:       {}", stats.candidates);
    println!("  Kept:      {} (rejected {})", stats.kept, stats.rejected);
    if stats.expanded > 0 {
        println!("  Full text: {}", stats.expanded);
    }
    if stats.deferred > 0 {
        println!("  Deferred:  {}", stats.deferred);
    }
    if stats.skipped > 0 {
        println!("  Skipped:   {} (retried next run)", stats.skipped);
    }
    println!("  Entries:   {}", stats.entries);
    match written {
        Some(path) => println!("  Output:    {}", path.display()),
        None => println!("  Output:    nothing new"),
    }
    println!(
        "  Time:      {:.1}s",
        stats.elapsed_ms as f64 / 1000.0
    );
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn batch_done(&self, stage: &str, done: usize, total: usize) {
        self.spinner
            .set_message(format!("{stage}: batch [{done}/{total}]"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// prune / stats
// ---------------------------------------------------------------------------

async fn cmd_prune(config_path: Option<&Path>, days: Option<u32>) -> Result<()> {
    let app = load(config_path)?;
    let pipeline_config = PipelineConfig::from_app(&app)?;
    let days = days
        .or(pipeline_config.retention_days)
        .ok_or_else(|| eyre!("no retention window: pass --days or set store.retention_days"))?;

    let storage = Storage::open(&pipeline_config.store_path).await?;
    let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
    let removed = storage.seen_prune(cutoff).await?;
    let remaining = storage.seen_count().await?;

    info!(removed, remaining, days, "pruned seen store");
    println!("Removed {removed} seen records older than {days} days ({remaining} remain).");
    Ok(())
}

async fn cmd_stats(config_path: Option<&Path>, limit: u32) -> Result<()> {
    let app = load(config_path)?;
    let pipeline_config = PipelineConfig::from_app(&app)?;
    let storage = Storage::open_readonly(&pipeline_config.store_path).await?;

    let seen = storage.seen_count().await?;
    let runs = storage.recent_runs(limit).await?;

    println!();
    println!("  Seen store: {}", pipeline_config.store_path.display());
    println!("  Seen articles: {seen}");
    println!();
    if runs.is_empty() {
        println!("  No runs recorded yet.");
    }
    for run in runs {
        let entries = run
            .stats_json
            .as_deref()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            .and_then(|v| v["stats"]["entries"].as_u64());
        let status = match (&run.finished_at, entries) {
            (Some(_), Some(n)) => format!("{n} entries"),
            (Some(_), None) => "finished".to_string(),
            (None, _) => "incomplete".to_string(),
        };
        println!("  {}  {status}", run.started_at);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => init_config_at(p)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
