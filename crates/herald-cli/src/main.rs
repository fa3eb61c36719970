use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use herald_client::{AlertTarget, ArticleExtractor, LinkListingProvider, ReqwestFetcher};
use herald_core::circuit_breaker::CircuitBreaker;
use herald_core::memory::{InMemoryContentStore, InMemoryJobStore, InMemorySourceRegistry};
use herald_core::traits::{
    ContentExtractor, ContentStore, EventSink, Fetcher, JobStore, SourceRegistry, TracingEventSink,
};
use herald_core::{
    Collaborators, JobStatus, JobStatusReport, Orchestrator, OrchestratorConfig, Source,
    SourceDefinition, TriggerJobRequest,
};
use herald_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "herald", version, about = "News article ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion job and print its final report
    Run {
        /// Source id to include (repeatable); defaults to every eligible source
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Candidates to take from each source
        #[arg(short = 'n', long, default_value_t = 10)]
        articles_per_source: u32,

        /// JSON array of source definitions
        #[arg(long, env = "HERALD_SOURCES_FILE")]
        sources_file: Option<PathBuf>,

        /// Use PostgreSQL stores (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        database: bool,

        /// Wall-clock budget for the job, in seconds
        #[arg(long)]
        budget_secs: Option<u64>,

        /// Debug-log per-field extraction provenance
        #[arg(long, default_value_t = false)]
        trace: bool,
    },

    /// Show a stored job, or the most recent jobs
    Status {
        /// Job id; omit to list recent jobs
        job_id: Option<Uuid>,

        /// Number of jobs (or events) to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Include the job's structured events
        #[arg(long, default_value_t = false)]
        events: bool,
    },

    /// Extract a single article from a URL or a local HTML file
    Extract {
        /// http(s) URL or path to an HTML file
        target: String,

        /// Print the per-field provenance trace
        #[arg(long, default_value_t = false)]
        trace: bool,
    },

    /// Inspect or store source definitions
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },
}

#[derive(Subcommand)]
enum SourcesAction {
    /// List sources with their circuit state
    List {
        /// Read definitions from a file instead of the database
        #[arg(long, env = "HERALD_SOURCES_FILE")]
        sources_file: Option<PathBuf>,
    },
    /// Upsert definitions from a JSON file into the database
    Sync { file: PathBuf },
}

type Pipeline<S, J, R, E> = Orchestrator<
    ReqwestFetcher,
    LinkListingProvider<ReqwestFetcher>,
    ArticleExtractor,
    S,
    J,
    R,
    E,
    AlertTarget,
>;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herald=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            sources,
            articles_per_source,
            sources_file,
            database,
            budget_secs,
            trace,
        } => {
            let mut config = OrchestratorConfig::from_env().context("Invalid HERALD_* settings")?;
            config.trace_extraction = trace;
            let mut request = TriggerJobRequest::new(sources, articles_per_source);
            if let Some(secs) = budget_secs {
                request = request.with_timeout_budget(Duration::from_secs(secs));
            }
            let report = if database {
                cmd_run_database(request, sources_file.as_deref(), config).await?
            } else {
                let path = sources_file
                    .context("--sources-file (or HERALD_SOURCES_FILE) is required without --database")?;
                cmd_run_memory(request, &path, config).await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status == JobStatus::Failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status {
            job_id,
            limit,
            events,
        } => {
            let db = connect_db().await?;
            cmd_status(&db, job_id, limit, events).await?;
        }
        Commands::Extract { target, trace } => {
            cmd_extract(&target, trace).await?;
        }
        Commands::Sources { action } => match action {
            SourcesAction::List { sources_file } => cmd_sources_list(sources_file.as_deref()).await?,
            SourcesAction::Sync { file } => {
                let db = connect_db().await?;
                sync_definitions(&db, &file).await?;
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// Connect using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("Database is not configured")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(db)
}

fn read_definitions(path: &Path) -> Result<Vec<SourceDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sources file: {}", path.display()))?;
    serde_json::from_str(&raw).context("Invalid JSON in sources file")
}

async fn sync_definitions(db: &Database, path: &Path) -> Result<()> {
    let definitions = read_definitions(path)?;
    let repo = db.source_repo(CircuitBreaker::default());
    for definition in &definitions {
        repo.upsert_source(definition)
            .await
            .with_context(|| format!("Failed to store source {}", definition.id))?;
    }
    tracing::info!(count = definitions.len(), "Source definitions synced");
    Ok(())
}

fn pipeline<S, J, R, E>(
    content: S,
    jobs: J,
    sources: R,
    events: E,
    config: OrchestratorConfig,
) -> Result<Pipeline<S, J, R, E>>
where
    S: ContentStore + 'static,
    J: JobStore + 'static,
    R: SourceRegistry + 'static,
    E: EventSink + 'static,
{
    let fetcher =
        ReqwestFetcher::from_env(config.fetch_timeout).context("Failed to create HTTP client")?;
    let alerts = AlertTarget::from_env().context("Invalid HERALD_ALERT_WEBHOOK_URL")?;
    Ok(Orchestrator::new(
        Collaborators {
            provider: LinkListingProvider::new(fetcher.clone()),
            fetcher,
            extractor: ArticleExtractor::default(),
            content,
            jobs,
            sources,
            events,
            alerts,
        },
        config,
    ))
}

async fn cmd_run_memory(
    request: TriggerJobRequest,
    sources_file: &Path,
    config: OrchestratorConfig,
) -> Result<JobStatusReport> {
    let registry = InMemorySourceRegistry::load_json(CircuitBreaker::default(), sources_file)
        .context("Failed to load sources file")?;
    let request = with_default_sources(request, &registry).await?;
    let pipeline = pipeline(
        InMemoryContentStore::new(),
        InMemoryJobStore::new(),
        registry,
        TracingEventSink,
        config,
    )?;
    drive(&pipeline, request).await
}

async fn cmd_run_database(
    request: TriggerJobRequest,
    sources_file: Option<&Path>,
    config: OrchestratorConfig,
) -> Result<JobStatusReport> {
    let db = connect_db().await?;
    if let Some(path) = sources_file {
        sync_definitions(&db, path).await?;
    }
    let registry = db.source_repo(CircuitBreaker::default());
    let request = with_default_sources(request, &registry).await?;
    let pipeline = pipeline(
        db.content_repo(),
        db.job_repo(),
        registry,
        db.event_repo(),
        config,
    )?;
    drive(&pipeline, request).await
}

/// An empty source list means every eligible source.
async fn with_default_sources(
    mut request: TriggerJobRequest,
    registry: &impl SourceRegistry,
) -> Result<TriggerJobRequest> {
    if request.sources.is_empty() {
        request.sources = registry
            .list_eligible_sources()
            .await
            .context("Failed to list sources")?
            .into_iter()
            .map(|s| s.id)
            .collect();
        if request.sources.is_empty() {
            bail!("No enabled sources to run");
        }
    }
    Ok(request)
}

/// Runs the job in the background, polling until it leaves this process.
/// The first Ctrl-C cancels it; the final report is read back from the store.
async fn drive<S, J, R, E>(
    pipeline: &Pipeline<S, J, R, E>,
    request: TriggerJobRequest,
) -> Result<JobStatusReport>
where
    S: ContentStore + 'static,
    J: JobStore + 'static,
    R: SourceRegistry + 'static,
    E: EventSink + 'static,
{
    let job_id = pipeline
        .trigger_job(request)
        .await
        .context("Failed to start job")?;
    tracing::info!(%job_id, "Job started, Ctrl-C to cancel");

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut cancel_sent = false;
    while pipeline.active_jobs().contains(&job_id) {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = tokio::signal::ctrl_c(), if !cancel_sent => {
                signal.context("Failed to listen for Ctrl-C")?;
                cancel_sent = pipeline.cancel_job(job_id).await;
                tracing::warn!(%job_id, "Cancelling job");
            }
        }
        if let Some(report) = pipeline.get_job_status(job_id).await? {
            tracing::debug!(
                %job_id,
                attempted = report.counts.attempted,
                scraped = report.counts.scraped,
                "Progress"
            );
        }
    }

    let report = pipeline
        .get_job_status(job_id)
        .await?
        .with_context(|| format!("Job {job_id} has no stored record"))?;
    tracing::info!(
        %job_id,
        status = %report.status,
        scraped = report.counts.scraped,
        errors = report.counts.errors,
        duplicates = report.counts.duplicates,
        skipped = report.counts.skipped,
        "Job finished"
    );
    Ok(report)
}

async fn cmd_status(db: &Database, job_id: Option<Uuid>, limit: usize, events: bool) -> Result<()> {
    let jobs = db.job_repo();
    let Some(job_id) = job_id else {
        let recent = jobs.list_jobs(limit).await.context("Failed to list jobs")?;
        if recent.is_empty() {
            println!("No jobs recorded");
        }
        for job in recent {
            println!(
                "{}  {:<12} {}  scraped={} errors={} duplicates={} skipped={}",
                job.id,
                job.status.as_str(),
                job.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
                job.total_articles_scraped,
                job.total_errors,
                job.total_duplicates,
                job.total_skipped,
            );
        }
        return Ok(());
    };

    let job = jobs
        .get_job(job_id)
        .await
        .context("Failed to load job")?
        .with_context(|| format!("Job {job_id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&JobStatusReport::from(&job))?);

    if events {
        for event in db.event_repo().list_for_job(job_id, limit).await? {
            println!(
                "{} [{}] {} {}",
                event.created_at.format("%H:%M:%S%.3f"),
                event.level,
                event.message,
                event.data
            );
        }
    }
    Ok(())
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

async fn cmd_extract(target: &str, trace: bool) -> Result<()> {
    let html = if is_remote(target) {
        tracing::info!("Fetching {}", target);
        let config = OrchestratorConfig::from_env().context("Invalid HERALD_* settings")?;
        let fetcher =
            ReqwestFetcher::from_env(config.fetch_timeout).context("Failed to create HTTP client")?;
        fetcher.fetch(target).await.context("Fetch failed")?
    } else {
        std::fs::read_to_string(target).with_context(|| format!("Failed to read {target}"))?
    };
    tracing::info!("Loaded {} bytes of HTML", html.len());

    let result = ArticleExtractor::default().extract(&html, target, trace);
    if let Some(rejection) = &result.rejection {
        tracing::warn!(%rejection, "Article rejected");
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn print_sources(sources: &[(Source, bool)]) {
    for (source, enabled) in sources {
        println!(
            "{:<20} {:<10} {:<8} failures={:<3} {}",
            source.id,
            source.circuit.state.as_str(),
            if *enabled { "enabled" } else { "disabled" },
            source.circuit.failure_count,
            source.feed_url,
        );
    }
}

async fn cmd_sources_list(sources_file: Option<&Path>) -> Result<()> {
    let sources = match sources_file {
        Some(path) => InMemorySourceRegistry::load_json(CircuitBreaker::default(), path)
            .context("Failed to load sources file")?
            .all_sources(),
        None => connect_db()
            .await?
            .source_repo(CircuitBreaker::default())
            .list_sources()
            .await
            .context("Failed to list sources")?,
    };
    if sources.is_empty() {
        println!("No sources defined");
    }
    print_sources(&sources);
    Ok(())
}
