//! Sync command implementations

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::ban::{BanRegistry, InMemoryTtlStore};
use crate::fetcher::{HttpMarketFetcher, MarketDataFetcher};
use crate::limit::{InMemoryWindowStore, RateLimiter};
use crate::persist::{MarketStore, SqliteMarketStore};
use crate::state::{state_path, RunState};
use crate::sync::progress::BatchProgress;
use crate::sync::{
    InProcessScheduler, RunReport, SharedBatch, SyncExecutor, SyncPolicy, SyncTask, TaskScheduler,
};

use super::CliError;

/// Maximum allowed workers to prevent self-inflicted rate limiting
const MAX_WORKERS: usize = 32;

/// Default upstream market data API base URL
const DEFAULT_BASE_URL: &str = "https://esi.evetech.net/latest";

/// Default directory for resumable run state
const DEFAULT_STATE_DIR: &str = ".sync-state";

/// Parse and validate the worker count
fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!("workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}

/// Output format options
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Market History Sync CLI
#[derive(Parser, Debug)]
#[command(name = "market-history-sync")]
#[command(about = "Sync market history from the upstream API into local storage", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// SQLite database path
    #[arg(long, global = true, default_value = "market.db")]
    pub db: PathBuf,

    /// Upstream API base URL
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Number of concurrent sync tasks (default: 4, max: 32)
    ///
    /// Higher values increase throughput for large regions by sweeping
    /// multiple task queues in parallel. The shared rate window coordinates
    /// all concurrent tasks to stay within upstream API limits.
    #[arg(long, global = true, default_value = "4", value_parser = parse_workers)]
    pub workers: usize,

    /// Maximum fetch attempts per task before it fails (default: 5, range: 1-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Upstream calls admitted per rate window
    #[arg(long, global = true, default_value = "300")]
    pub rate_ceiling: u32,

    /// Rate window length in seconds
    #[arg(long, global = true, default_value = "60")]
    pub rate_window_secs: u64,

    /// Delay before a transiently failed task is retried, in seconds
    #[arg(long, global = true, default_value = "60")]
    pub retry_delay_secs: u64,

    /// How long a missing resource stays banned, in days
    #[arg(long, global = true, default_value = "30")]
    pub ban_days: u64,

    /// Count throttled admissions against the retry budget
    ///
    /// Off by default: a full rate window says nothing about the resource
    /// being synced, so waiting it out does not consume retries.
    #[arg(long, global = true, default_value_t = false)]
    pub count_throttle: bool,

    /// Type ids per history task
    #[arg(long, global = true, default_value = "100")]
    pub chunk_size: usize,

    /// Prometheus scrape endpoint address (e.g. 0.0.0.0:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Directory for resumable run state (default: ".sync-state")
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Resume unfinished tasks saved by a previous cancelled run
    #[arg(long, global = true, default_value_t = false)]
    pub resume: bool,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sweep the upstream type listing for a region
    Listing(ListingArgs),

    /// Sync market history for types in a region
    History(HistoryArgs),

    /// Sweep the listing, then sync history for every listed type
    Run(RunArgs),
}

/// Arguments for the listing sweep
#[derive(Parser, Debug)]
pub struct ListingArgs {
    /// Region to sweep
    #[arg(long)]
    pub region: u32,
}

/// Arguments for the history sync
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Region to sync
    #[arg(long)]
    pub region: u32,

    /// Explicit type ids to sync, comma separated (defaults to every stored listing)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<u32>,
}

/// Arguments for the combined run
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Region to sync
    #[arg(long)]
    pub region: u32,
}

/// Build a sync policy from the global CLI flags.
fn build_policy(cli: &Cli) -> Result<SyncPolicy, CliError> {
    let policy = SyncPolicy {
        max_attempts: cli.max_attempts,
        retry_delay: Duration::from_secs(cli.retry_delay_secs),
        ban_duration: Duration::from_secs(cli.ban_days * 24 * 60 * 60),
        rate_ceiling: cli.rate_ceiling,
        rate_window: Duration::from_secs(cli.rate_window_secs),
        throttle_consumes_retry: cli.count_throttle,
        task_chunk_size: cli.chunk_size,
        workers: cli.workers,
    };
    policy.validate().map_err(CliError::ConfigurationError)?;
    Ok(policy)
}

/// Collaborators wired once per command invocation
struct SyncContext {
    limiter: RateLimiter,
    bans: BanRegistry,
    fetcher: Arc<dyn MarketDataFetcher>,
    store: Arc<dyn MarketStore>,
    policy: SyncPolicy,
    batch: SharedBatch,
    output_format: OutputFormat,
}

impl SyncContext {
    /// Wire shared collaborators from the global CLI flags.
    async fn from_cli(cli: &Cli, batch: SharedBatch) -> Result<Self, CliError> {
        let policy = build_policy(cli)?;

        if let Some(addr) = cli.metrics_addr {
            crate::metrics::init_metrics(addr).await.map_err(|e| {
                CliError::ConfigurationError(format!("failed to initialize metrics: {e}"))
            })?;
        }

        let store = SqliteMarketStore::new(cli.db.clone()).await?;
        let fetcher = HttpMarketFetcher::new(cli.base_url.clone());

        Ok(Self {
            limiter: RateLimiter::new(Arc::new(InMemoryWindowStore::new())),
            bans: BanRegistry::new(Arc::new(InMemoryTtlStore::new())),
            fetcher: Arc::new(fetcher),
            store: Arc::new(store),
            policy,
            batch,
            output_format: cli.output_format,
        })
    }
}

/// Run one batch of tasks through a fresh scheduler round.
async fn run_tasks(
    ctx: &SyncContext,
    tasks: Vec<SyncTask>,
    message: &str,
) -> Result<RunReport, CliError> {
    let scheduler = InProcessScheduler::new(Arc::clone(&ctx.batch), ctx.policy.workers);
    let handle = scheduler.handle();

    let executor = Arc::new(
        SyncExecutor::new(
            ctx.limiter.clone(),
            ctx.bans.clone(),
            Arc::clone(&ctx.fetcher),
            Arc::clone(&ctx.store),
            Arc::new(handle.clone()),
            ctx.policy.clone(),
        )
        .with_batch(Arc::clone(&ctx.batch)),
    );

    info!(tasks = tasks.len(), workers = ctx.policy.workers, "{message}");

    ctx.batch.register_tasks(tasks.len());
    for task in tasks {
        handle.enqueue(task, Duration::ZERO).await?;
    }

    let progress = match ctx.output_format {
        OutputFormat::Human => Some(BatchProgress::start(
            Arc::clone(&ctx.batch),
            message.to_string(),
        )),
        OutputFormat::Json => None,
    };

    let report = scheduler
        .run(move |task| {
            let executor = Arc::clone(&executor);
            async move { executor.run_task(task).await }
        })
        .await;

    if let Some(progress) = progress {
        progress.finish(format!(
            "{message}: {} completed, {} failed, {} cancelled",
            report.completed.len(),
            report.failed.len(),
            report.cancelled.len()
        ));
    }

    Ok(report)
}

/// Chunk type ids into history tasks.
fn build_history_tasks(
    region_id: u32,
    type_ids: Vec<u32>,
    policy: &SyncPolicy,
    batch_id: &str,
) -> Vec<SyncTask> {
    type_ids
        .chunks(policy.task_chunk_size.max(1))
        .map(|chunk| {
            SyncTask::history(region_id, chunk.to_vec(), policy.max_attempts).with_batch(batch_id)
        })
        .collect()
}

/// Resolve the run state file path for a region.
fn resolve_state_path(cli: &Cli, region_id: u32) -> PathBuf {
    let dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    state_path(&dir, region_id)
}

/// Load saved tasks when --resume is set; empty when none were saved.
///
/// Saved task values replay verbatim, so they are self-describing: resuming
/// runs whatever work was pending for the region regardless of which command
/// saved it.
fn load_resume_tasks(cli: &Cli, region_id: u32) -> Result<Vec<SyncTask>, CliError> {
    if !cli.resume {
        return Ok(Vec::new());
    }

    let path = resolve_state_path(cli, region_id);
    if !path.exists() {
        info!(path = %path.display(), "No saved run state, starting fresh");
        return Ok(Vec::new());
    }

    let state = RunState::load(&path)?;
    info!(
        pending = state.pending().len(),
        batch_id = %state.batch_id(),
        "Resuming unfinished tasks from previous run"
    );
    Ok(state.into_pending())
}

/// Save unfinished tasks after a cancelled run; clear stale state after a
/// clean one. Failed tasks are terminal and are not saved.
fn persist_run_state(
    cli: &Cli,
    region_id: u32,
    batch_id: &str,
    report: &RunReport,
) -> Result<(), CliError> {
    let path = resolve_state_path(cli, region_id);

    if report.cancelled.is_empty() {
        RunState::remove(&path);
        return Ok(());
    }

    let mut state = RunState::new(batch_id, region_id);
    for task in &report.cancelled {
        state.push_pending(task.clone());
    }
    state.save(&path)?;
    info!(
        pending = report.cancelled.len(),
        path = %path.display(),
        "Saved unfinished tasks for resume"
    );
    Ok(())
}

// ─── Output functions ────────────────────────────────────────────────────────

/// Finished run facts for output formatting
struct RunSummary<'a> {
    command: &'static str,
    region_id: u32,
    report: &'a RunReport,
    history_records: Option<u64>,
    listed_types: Option<usize>,
}

/// Output the run summary as JSON
fn output_json(summary: &RunSummary<'_>) {
    let errors: Vec<_> = summary
        .report
        .failed
        .iter()
        .map(|(task, error)| {
            serde_json::json!({
                "task_id": task.id,
                "error": error.to_string(),
            })
        })
        .collect();

    let output = serde_json::json!({
        "success": summary.report.is_clean(),
        "command": summary.command,
        "region_id": summary.region_id,
        "tasks_completed": summary.report.completed.len(),
        "tasks_failed": summary.report.failed.len(),
        "tasks_cancelled": summary.report.cancelled.len(),
        "listed_types": summary.listed_types,
        "history_records": summary.history_records,
        "errors": errors,
    });

    println!("{}", serde_json::to_string(&output).unwrap());
}

/// Output the run summary in human-readable format
fn output_human(summary: &RunSummary<'_>) {
    let report = summary.report;

    if report.is_clean() {
        println!("\nSync completed successfully!");
    } else if report.failed.is_empty() {
        println!("\nSync cancelled.");
    } else {
        eprintln!("\nSync finished with failures!");
    }

    println!("Region: {}", summary.region_id);
    println!("Tasks completed: {}", report.completed.len());
    if let Some(listed) = summary.listed_types {
        println!("Types listed: {listed}");
    }
    if let Some(records) = summary.history_records {
        println!("History records stored: {records}");
    }
    if !report.cancelled.is_empty() {
        println!("Tasks cancelled: {}", report.cancelled.len());
    }

    for (task, error) in &report.failed {
        eprintln!("Task {} failed: {error}", task.id);
        error!(task_id = %task.id, error = %error, "Sync task failed");
    }
}

/// Map a finished report onto the process exit result.
fn finish_report(report: RunReport) -> Result<(), CliError> {
    if let Some((_, error)) = report.failed.into_iter().next() {
        return Err(CliError::SyncError(error));
    }
    if !report.cancelled.is_empty() {
        return Err(CliError::Cancelled);
    }
    Ok(())
}

// ─── Args execute implementations ────────────────────────────────────────────

impl ListingArgs {
    /// Execute a listing sweep.
    pub async fn execute(&self, cli: &Cli, batch: SharedBatch) -> Result<(), CliError> {
        let ctx = SyncContext::from_cli(cli, batch).await?;

        let mut tasks = load_resume_tasks(cli, self.region)?;
        if tasks.is_empty() {
            tasks.push(
                SyncTask::listing(self.region, ctx.policy.max_attempts)
                    .with_batch(ctx.batch.id()),
            );
        }

        let report = run_tasks(&ctx, tasks, "Sweeping type listing").await?;
        persist_run_state(cli, self.region, ctx.batch.id(), &report)?;

        let listed = ctx.store.listings(self.region).await?.len();
        let summary = RunSummary {
            command: "listing",
            region_id: self.region,
            report: &report,
            history_records: None,
            listed_types: Some(listed),
        };
        match ctx.output_format {
            OutputFormat::Json => output_json(&summary),
            OutputFormat::Human => output_human(&summary),
        }

        finish_report(report)
    }
}

impl HistoryArgs {
    /// Execute a history sync.
    pub async fn execute(&self, cli: &Cli, batch: SharedBatch) -> Result<(), CliError> {
        let ctx = SyncContext::from_cli(cli, batch).await?;

        let mut tasks = load_resume_tasks(cli, self.region)?;
        if tasks.is_empty() {
            let type_ids = if self.types.is_empty() {
                let listings = ctx.store.listings(self.region).await?;
                listings
                    .into_iter()
                    .map(|listing| listing.type_id)
                    .collect()
            } else {
                self.types.clone()
            };

            if type_ids.is_empty() {
                return Err(CliError::InvalidArgument(format!(
                    "no stored listings for region {}; run the listing command first or pass --types",
                    self.region
                )));
            }

            tasks = build_history_tasks(self.region, type_ids, &ctx.policy, ctx.batch.id());
        }

        let report = run_tasks(&ctx, tasks, "Syncing market history").await?;
        persist_run_state(cli, self.region, ctx.batch.id(), &report)?;

        let records = ctx.store.history_count(self.region).await?;
        let summary = RunSummary {
            command: "history",
            region_id: self.region,
            report: &report,
            history_records: Some(records),
            listed_types: None,
        };
        match ctx.output_format {
            OutputFormat::Json => output_json(&summary),
            OutputFormat::Human => output_human(&summary),
        }

        finish_report(report)
    }
}

impl RunArgs {
    /// Execute a listing sweep followed by a full history sync.
    pub async fn execute(&self, cli: &Cli, batch: SharedBatch) -> Result<(), CliError> {
        let ctx = SyncContext::from_cli(cli, batch).await?;

        // A resumed run replays the saved tasks and nothing else; the listing
        // phase already ran before the state was saved.
        let resumed = load_resume_tasks(cli, self.region)?;
        if !resumed.is_empty() {
            let report = run_tasks(&ctx, resumed, "Resuming sync").await?;
            persist_run_state(cli, self.region, ctx.batch.id(), &report)?;

            let records = ctx.store.history_count(self.region).await?;
            let summary = RunSummary {
                command: "run",
                region_id: self.region,
                report: &report,
                history_records: Some(records),
                listed_types: None,
            };
            match ctx.output_format {
                OutputFormat::Json => output_json(&summary),
                OutputFormat::Human => output_human(&summary),
            }
            return finish_report(report);
        }

        let listing_task =
            SyncTask::listing(self.region, ctx.policy.max_attempts).with_batch(ctx.batch.id());
        let listing_report = run_tasks(&ctx, vec![listing_task], "Sweeping type listing").await?;

        if !listing_report.is_clean() {
            persist_run_state(cli, self.region, ctx.batch.id(), &listing_report)?;
            let summary = RunSummary {
                command: "run",
                region_id: self.region,
                report: &listing_report,
                history_records: None,
                listed_types: None,
            };
            match ctx.output_format {
                OutputFormat::Json => output_json(&summary),
                OutputFormat::Human => output_human(&summary),
            }
            return finish_report(listing_report);
        }

        let type_ids: Vec<u32> = ctx
            .store
            .listings(self.region)
            .await?
            .into_iter()
            .map(|listing| listing.type_id)
            .collect();
        let listed = type_ids.len();

        if type_ids.is_empty() {
            warn!(region_id = self.region, "Listing sweep found no types");
        }

        let mut report = listing_report;
        if !type_ids.is_empty() {
            let history_tasks =
                build_history_tasks(self.region, type_ids, &ctx.policy, ctx.batch.id());
            let history_report = run_tasks(&ctx, history_tasks, "Syncing market history").await?;
            report.completed.extend(history_report.completed);
            report.failed.extend(history_report.failed);
            report.cancelled.extend(history_report.cancelled);
        }
        persist_run_state(cli, self.region, ctx.batch.id(), &report)?;

        let records = ctx.store.history_count(self.region).await?;
        let summary = RunSummary {
            command: "run",
            region_id: self.region,
            report: &report,
            history_records: Some(records),
            listed_types: Some(listed),
        };
        match ctx.output_format {
            OutputFormat::Json => output_json(&summary),
            OutputFormat::Human => output_human(&summary),
        }

        finish_report(report)
    }
}
