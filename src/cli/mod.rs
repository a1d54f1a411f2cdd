//! Command-line interface for graphmem.
//!
//! Provides commands for enqueueing videos, running pipeline workers,
//! inspecting progress and failures, and operator recovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use tracing::{info, warn};

use crate::adapters::acquire::list_channel;
use crate::adapters::{
    video_id_from_url, DeepgramTranscriber, FallbackTranscriber, GraphitiIngestor,
    OffmuteTranscriber, SourceAcquirer, Transcriber, TranscriptionError,
};
use crate::config::{ResolvedConfig, TranscribeBackend};
use crate::core::{Collaborators, Orchestrator, Reporter, RetryPolicy, RunReport};
use crate::domain::{ItemId, NewWorkItem, Stage, Status, WorkItem};
use crate::store::WorkItemStore;

/// Number of failures shown by `status`
const RECENT_FAILURES: usize = 5;

/// graphmem - Video to knowledge-graph pipeline
#[derive(Parser, Debug)]
#[command(name = "graphmem")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enqueue videos for processing
    #[command(group(
        ArgGroup::new("input")
            .required(true)
            .args(["video_urls", "local_paths", "channel_url"])
    ))]
    Prepare {
        /// Video URLs or ids
        #[arg(long, num_args = 1..)]
        video_urls: Vec<String>,

        /// Local media files
        #[arg(long, num_args = 1..)]
        local_paths: Vec<PathBuf>,

        /// Channel or playlist URL to list
        #[arg(long)]
        channel_url: Option<String>,

        /// Maximum number of channel videos to enqueue
        #[arg(short, long)]
        limit: Option<usize>,

        /// Scope prefix for composite ids (e.g. a channel name)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Run pipeline workers until the queue is empty
    Run {
        /// Single stage to run (full pipeline if omitted)
        #[arg(value_enum)]
        stage: Option<Stage>,

        /// Number of concurrent workers
        #[arg(short, long, default_value = "1")]
        workers: usize,
    },

    /// Show item counts and recent failures
    Status,

    /// Send an item back to a stage's entry state
    Retry {
        /// Item id
        id: String,

        /// Stage to restart from (acquire if omitted)
        #[arg(long, value_enum)]
        stage: Option<Stage>,
    },

    /// List all failed items with their errors
    Errors,

    /// Requeue items stuck in an in-progress status
    Recover {
        /// Minimum time since the last update, in minutes
        #[arg(long)]
        older_than: u32,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = ResolvedConfig::load()?;

        match self.command {
            Commands::Prepare {
                video_urls,
                local_paths,
                channel_url,
                limit,
                scope,
            } => {
                prepare(&cfg, video_urls, local_paths, channel_url, limit, scope).await
            }
            Commands::Run { stage, workers } => run_workers(&cfg, stage, workers).await,
            Commands::Status => show_status(&cfg),
            Commands::Retry { id, stage } => retry_item(&cfg, &id, stage),
            Commands::Errors => list_errors(&cfg),
            Commands::Recover { older_than } => recover(&cfg, older_than),
            Commands::Config => show_config(&cfg),
        }
    }
}

fn open_store(cfg: &ResolvedConfig) -> Result<WorkItemStore> {
    WorkItemStore::open(&cfg.database, cfg.busy_timeout)
        .with_context(|| format!("Failed to open database: {}", cfg.database.display()))
}

fn item_id(scope: Option<&str>, leaf: &str) -> ItemId {
    match scope {
        Some(scope) => ItemId::scoped(scope, leaf),
        None => ItemId::flat(leaf),
    }
}

/// Enqueue videos from URLs, local files, or a channel listing
async fn prepare(
    cfg: &ResolvedConfig,
    video_urls: Vec<String>,
    local_paths: Vec<PathBuf>,
    channel_url: Option<String>,
    limit: Option<usize>,
    scope: Option<String>,
) -> Result<()> {
    let scope = scope.as_deref();
    let mut items = Vec::new();

    for url in &video_urls {
        match video_id_from_url(url) {
            Some(leaf) => {
                let title = format!("Video {}", leaf);
                items.push(NewWorkItem::remote(item_id(scope, &leaf), title));
            }
            None => warn!(%url, "Could not extract a video id, skipping"),
        }
    }

    for path in &local_paths {
        items.push(local_item(scope, path)?);
    }

    if let Some(url) = channel_url {
        let entries = list_channel(&cfg.acquirer, &url, limit).await?;
        for entry in entries {
            let duration = entry.duration.map(|d| d.round() as i64);
            items.push(
                NewWorkItem::remote(item_id(scope, &entry.id), entry.display_title())
                    .with_duration(duration),
            );
        }
    }

    if items.is_empty() {
        eprintln!("Nothing to enqueue");
        return Ok(());
    }

    let store = open_store(cfg)?;
    for item in &items {
        store.upsert(item)?;
        println!("{:<40} {}", item.id.to_string(), item.title);
    }
    eprintln!("\n[Enqueued {} item(s)]", items.len());
    Ok(())
}

fn local_item(scope: Option<&str>, path: &Path) -> Result<NewWorkItem> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Local file not found: {}", path.display()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("No file name in {}", path.display()))?;
    let title = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| stem.clone());

    Ok(NewWorkItem::local(item_id(scope, &stem), title, path))
}

fn collaborators(cfg: &ResolvedConfig) -> Result<Collaborators> {
    let ingestor = GraphitiIngestor::new(
        cfg.ingestor.clone(),
        &cfg.downloads,
        cfg.transcriber.artifact_suffix.clone(),
    )
    .context("Failed to create Graphiti client")?;

    Ok(Collaborators {
        acquirer: Arc::new(SourceAcquirer::new(cfg.acquirer.clone(), cfg.artifact_resolver())),
        transcriber: transcriber(cfg)?,
        ingestor: Arc::new(ingestor),
    })
}

/// Transcriber for the configured backend.
///
/// offmute is backed by Deepgram when an API key is available; an explicit
/// Deepgram backend requires the key.
fn transcriber(cfg: &ResolvedConfig) -> Result<Arc<dyn Transcriber>> {
    let suffix = &cfg.transcriber.artifact_suffix;
    match cfg.transcriber.backend {
        TranscribeBackend::Deepgram => {
            let deepgram = DeepgramTranscriber::new(cfg.deepgram.clone(), suffix.as_str())
                .context("Deepgram transcription backend is not usable")?;
            Ok(Arc::new(deepgram))
        }
        TranscribeBackend::Offmute => {
            let offmute: Arc<dyn Transcriber> = Arc::new(OffmuteTranscriber::new(cfg.transcriber.clone()));
            match DeepgramTranscriber::new(cfg.deepgram.clone(), suffix.as_str()) {
                Ok(deepgram) => {
                    info!("Deepgram fallback enabled");
                    Ok(Arc::new(FallbackTranscriber::new(offmute, Arc::new(deepgram))))
                }
                Err(TranscriptionError::MissingApiKey) => Ok(offmute),
                Err(e) => Err(e).context("Failed to create Deepgram client"),
            }
        }
    }
}

/// Run `workers` orchestrators, each on its own connection, until the queue is empty
async fn run_workers(cfg: &ResolvedConfig, stage: Option<Stage>, workers: usize) -> Result<()> {
    let collaborators = collaborators(cfg)?;
    let retry = RetryPolicy::new(cfg.max_retries);
    let workers = workers.max(1);

    info!(
        stage = stage.map(|s| s.to_string()).unwrap_or_else(|| "all".to_string()),
        workers,
        max_retries = cfg.max_retries,
        "Starting workers"
    );

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let store = Arc::new(open_store(cfg)?);
        let orchestrator = Orchestrator::new(store, cfg.artifact_resolver(), collaborators.clone())
            .with_retry_policy(retry);
        handles.push(tokio::spawn(async move { orchestrator.run(stage).await }));
    }

    let mut total = RunReport::default();
    for handle in handles {
        let report = handle.await.context("Worker task panicked")??;
        total.merge(&report);
    }

    eprintln!(
        "\n[Claimed {}: {} succeeded, {} requeued, {} failed]",
        total.claimed, total.succeeded, total.requeued, total.failed
    );
    Ok(())
}

fn show_status(cfg: &ResolvedConfig) -> Result<()> {
    let store = open_store(cfg)?;
    let reporter = Reporter::new(&store);
    let summary = reporter.status_summary()?;

    println!("{:<15} {:>8}", "STATUS", "COUNT");
    println!("{}", "-".repeat(24));
    for (status, count) in &summary.counts {
        println!("{:<15} {:>8}", status.to_string(), count);
    }
    println!("{}", "-".repeat(24));
    println!("{:<15} {:>8}", "total", summary.total());

    let failures = reporter.recent_failures(RECENT_FAILURES)?;
    if !failures.is_empty() {
        println!("\nRecent failures:");
        print_failures(&failures);
    }
    Ok(())
}

fn list_errors(cfg: &ResolvedConfig) -> Result<()> {
    let store = open_store(cfg)?;
    let failures = Reporter::new(&store).errors()?;

    if failures.is_empty() {
        println!("No failed items");
        return Ok(());
    }
    print_failures(&failures);
    eprintln!("\n[{} failed item(s)]", failures.len());
    Ok(())
}

fn print_failures(items: &[WorkItem]) {
    println!("{:<30} {:>7} {:<20} ERROR", "ID", "RETRIES", "UPDATED");
    println!("{}", "-".repeat(90));
    for item in items {
        println!(
            "{:<30} {:>7} {:<20} {}",
            item.id,
            item.retries,
            item.updated_at.format("%Y-%m-%d %H:%M:%S"),
            item.error.as_deref().unwrap_or("")
        );
    }
}

fn retry_item(cfg: &ResolvedConfig, id: &str, stage: Option<Stage>) -> Result<()> {
    let store = open_store(cfg)?;
    let status = Reporter::new(&store)
        .retry(id, stage)
        .with_context(|| format!("Failed to retry {}", id))?;
    println!("{} -> {}", id, status);
    Ok(())
}

fn recover(cfg: &ResolvedConfig, older_than_minutes: u32) -> Result<()> {
    let store = open_store(cfg)?;
    let requeued = store.requeue_stale(chrono::Duration::minutes(i64::from(older_than_minutes)))?;

    if requeued.is_empty() {
        println!("No stale items");
        return Ok(());
    }
    for (id, status) in &requeued {
        println!("{} -> {}", id, status);
    }
    eprintln!("\n[Requeued {} item(s)]", requeued.len());
    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("graphmem configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Database:  {}", cfg.database.display());
    println!("  Downloads: {}", cfg.downloads.display());
    println!();
    println!("Pipeline:");
    println!("  Max retries:  {}", cfg.max_retries);
    println!("  Busy timeout: {}ms", cfg.busy_timeout.as_millis());
    println!();
    println!("Acquirer:    {} (format {}, suffix {})", cfg.acquirer.binary, cfg.acquirer.format, cfg.acquirer.media_suffix);
    println!(
        "Transcriber: {} via {} {} (tier {}, suffix {})",
        cfg.transcriber.backend,
        cfg.transcriber.runner,
        cfg.transcriber.package,
        cfg.transcriber.tier,
        cfg.transcriber.artifact_suffix
    );
    println!(
        "Deepgram:    {} (api key {})",
        cfg.deepgram.endpoint,
        if cfg.deepgram.api_key.is_some() { "set" } else { "not set" }
    );
    println!("Ingestor:    {} (chunk size {})", cfg.ingestor.endpoint, cfg.ingestor.chunk_size);
    println!();
    println!("Statuses: {}", Status::ALL.map(|s| s.to_string()).join(", "));

    Ok(())
}
