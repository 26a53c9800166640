use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stream_ingest::background_jobs::jobs::{
    register_pipeline_jobs, MatchRequest, PipelineJobsConfig,
};
use stream_ingest::background_jobs::{create_scheduler, JobContext, JobQueue, SchedulerHandle};
use stream_ingest::catalog_store::{CatalogStore, NewCatalogEntry, SqliteCatalogStore, StreamStore};
use stream_ingest::config::{self, AppConfig};
use stream_ingest::discovery::{CatalogDiscovery, TmdbDiscoveryClient};
use stream_ingest::provider::{HttpProviderAdapter, ProviderAdapter};
use stream_ingest::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use stream_ingest::server_store::{
    AuditQuery, IngestJob, IngestStatus, JobRunStatus, ServerStore, SqliteServerStore,
    DEFAULT_AUDIT_QUERY_LIMIT,
};
use stream_ingest::settings::{initialize_default_settings, update_setting, PipelineSettings};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path {}: {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version, about = "Stream-quality ingestion pipeline")]
struct CliArgs {
    /// Path to a TOML config file. Its values override command line flags.
    #[clap(long, value_parser = parse_path, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding catalog.db and server.db.
    #[clap(long, value_parser = parse_path, global = true)]
    pub db_dir: Option<PathBuf>,

    /// The port the admin API listens on.
    #[clap(short, long, default_value_t = config::DEFAULT_PORT, global = true)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path", global = true)]
    pub logging_level: RequestsLoggingLevel,

    /// Key for the discovery API. Falls back to the TMDB_API_KEY variable.
    #[clap(long, global = true)]
    pub tmdb_api_key: Option<String>,

    /// Base URL of the discovery API.
    #[clap(long, default_value = stream_ingest::discovery::DEFAULT_TMDB_BASE_URL, global = true)]
    pub tmdb_base_url: String,

    /// Overall deadline of a single job run, in seconds.
    #[clap(long, default_value_t = 1800, global = true)]
    pub job_timeout_secs: u64,

    /// How many match runs may be in flight at once.
    #[clap(long, default_value_t = 2, global = true)]
    pub match_concurrency: usize,

    /// Days to keep ingest audit records.
    #[clap(long, default_value_t = 30, global = true)]
    pub audit_retention_days: u64,

    /// Start the admin API without timed job schedules.
    #[clap(long, global = true)]
    pub no_scheduler: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and the admin API until Ctrl+C.
    Serve,
    /// Run one job in-process and exit. Fails if the run fails.
    Run {
        job: RunJob,
        /// Match by external catalog id.
        #[clap(long)]
        external_id: Option<i64>,
        /// Match by catalog entry id.
        #[clap(long)]
        entry_id: Option<i64>,
    },
    /// Add or update a catalog entry.
    CatalogAdd {
        #[clap(long)]
        external_id: i64,
        #[clap(long)]
        title: String,
        #[clap(long)]
        year: Option<i32>,
        #[clap(long)]
        alt_id: Option<String>,
    },
    /// Print every pipeline setting.
    Settings,
    /// Change one pipeline setting. VALUE is parsed as JSON when possible.
    SettingsSet { key: String, value: String },
    /// Print audit records as JSON lines, newest first.
    Logs {
        #[clap(long)]
        job: Option<String>,
        #[clap(long)]
        status: Option<String>,
        #[clap(long)]
        external_id: Option<i64>,
        #[clap(long, default_value_t = DEFAULT_AUDIT_QUERY_LIMIT)]
        limit: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RunJob {
    Discovery,
    Match,
    Refresh,
    Reverify,
}

impl RunJob {
    fn ingest_job(&self) -> IngestJob {
        match self {
            RunJob::Discovery => IngestJob::Discover,
            RunJob::Match => IngestJob::Match,
            RunJob::Refresh => IngestJob::Refresh,
            RunJob::Reverify => IngestJob::Reverify,
        }
    }
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            scheduler_enabled: !args.no_scheduler,
            tmdb_api_key: args.tmdb_api_key.clone(),
            tmdb_base_url: args.tmdb_base_url.clone(),
            job_timeout_secs: args.job_timeout_secs,
            match_concurrency: args.match_concurrency,
            audit_retention_days: args.audit_retention_days,
            ..Default::default()
        }
    }
}

/// Stores and clients shared by every command that runs jobs.
struct Pipeline {
    catalog_store: Arc<SqliteCatalogStore>,
    server_store: Arc<SqliteServerStore>,
    provider: Arc<dyn ProviderAdapter>,
    discovery: Arc<dyn CatalogDiscovery>,
}

impl Pipeline {
    fn open(app_config: &AppConfig) -> Result<Self> {
        let (catalog_store, server_store) = open_stores(app_config)?;
        let provider = HttpProviderAdapter::new(app_config.provider_adapter_config())
            .context("creating provider adapter")?;
        let discovery = TmdbDiscoveryClient::new(
            &app_config.tmdb_base_url,
            app_config.tmdb_api_key.clone(),
            app_config.discovery_timeout,
        )
        .context("creating discovery client")?;
        Ok(Self {
            catalog_store,
            server_store,
            provider: Arc::new(provider),
            discovery: Arc::new(discovery),
        })
    }

    fn job_context(&self, token: CancellationToken) -> JobContext {
        JobContext::new(
            token,
            self.catalog_store.clone() as Arc<dyn CatalogStore>,
            self.catalog_store.clone() as Arc<dyn StreamStore>,
            self.server_store.clone() as Arc<dyn ServerStore>,
            self.provider.clone(),
            self.discovery.clone(),
        )
    }
}

fn open_stores(app_config: &AppConfig) -> Result<(Arc<SqliteCatalogStore>, Arc<SqliteServerStore>)> {
    info!("Opening catalog store at {:?}", app_config.catalog_db_path());
    let catalog_store = SqliteCatalogStore::new(app_config.catalog_db_path())
        .context("opening catalog store")?;
    info!("Opening server store at {:?}", app_config.server_db_path());
    let server_store =
        SqliteServerStore::new(app_config.server_db_path()).context("opening server store")?;
    initialize_default_settings(&server_store)?;
    Ok((Arc::new(catalog_store), Arc::new(server_store)))
}

fn jobs_config(app_config: &AppConfig) -> PipelineJobsConfig {
    PipelineJobsConfig {
        match_concurrency: app_config.match_concurrency,
        audit_retention_days: app_config.audit_retention_days,
        audit_cleanup_interval_hours: app_config.audit_cleanup_interval_hours,
    }
}

async fn serve(app_config: AppConfig) -> Result<()> {
    metrics::init_metrics();
    let pipeline = Pipeline::open(&app_config)?;
    let settings = PipelineSettings::load(pipeline.server_store.as_ref())?;

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) = create_scheduler(
        pipeline.server_store.clone(),
        shutdown_token.clone(),
        pipeline.job_context(CancellationToken::new()),
        app_config.job_timeout,
    );
    scheduler.set_timers_enabled(app_config.scheduler_enabled);
    register_pipeline_jobs(
        &mut scheduler,
        Arc::new(scheduler_handle.clone()) as Arc<dyn JobQueue>,
        &settings,
        &jobs_config(&app_config),
    )
    .await;

    let state = ServerState {
        config: ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
        },
        start_time: Instant::now(),
        catalog_store: pipeline.catalog_store.clone(),
        stream_store: pipeline.catalog_store.clone(),
        server_store: pipeline.server_store.clone(),
        scheduler_handle,
    };

    info!("Ready to serve at port {}!", app_config.port);

    let mut scheduler_task = tokio::spawn(async move { scheduler.run().await });

    // Run HTTP server and job scheduler concurrently
    let result = tokio::select! {
        result = run_server(state, shutdown_token.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = &mut scheduler_task => {
            info!("Scheduler stopped");
            return Ok(());
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            Ok(())
        }
    };

    shutdown_token.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    result
}

async fn run_job(
    app_config: AppConfig,
    job: RunJob,
    external_id: Option<i64>,
    entry_id: Option<i64>,
) -> Result<()> {
    let params = match job {
        RunJob::Match => {
            if external_id.is_none() && entry_id.is_none() {
                bail!("match needs --external-id or --entry-id");
            }
            let request = MatchRequest {
                external_id,
                catalog_entry_id: entry_id,
            };
            Some(request.to_params())
        }
        _ => None,
    };

    let pipeline = Pipeline::open(&app_config)?;
    let settings = PipelineSettings::load(pipeline.server_store.as_ref())?;
    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) = create_scheduler(
        pipeline.server_store.clone(),
        shutdown_token.clone(),
        pipeline.job_context(CancellationToken::new()),
        app_config.job_timeout,
    );
    scheduler.set_timers_enabled(false);
    register_pipeline_jobs(
        &mut scheduler,
        Arc::new(scheduler_handle.clone()) as Arc<dyn JobQueue>,
        &settings,
        &jobs_config(&app_config),
    )
    .await;

    let scheduler_task = tokio::spawn(async move { scheduler.run().await });
    let job_id = job.ingest_job().as_str();
    let result = run_to_completion(&scheduler_handle, job_id, params).await;
    shutdown_token.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    result
}

/// Triggers one run, waits for it and everything it queued, then reports
/// the run's outcome.
async fn run_to_completion(
    handle: &SchedulerHandle,
    job_id: &str,
    params: Option<JsonValue>,
) -> Result<()> {
    handle
        .trigger_job(job_id, params)
        .await
        .with_context(|| format!("starting {}", job_id))?;
    tokio::select! {
        _ = handle.wait_until_idle(Duration::from_millis(100)) => {}
        _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
    }

    let last_run = handle
        .get_job_history(job_id, 1)?
        .into_iter()
        .next()
        .with_context(|| format!("no recorded run of {}", job_id))?;
    if last_run.status != JobRunStatus::Completed.as_str() {
        bail!(
            "{} {}: {}",
            job_id,
            last_run.status,
            last_run.error_message.unwrap_or_default()
        );
    }
    info!("{} completed", job_id);
    Ok(())
}

fn print_json_line<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("initializing logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    match cli_args.command {
        Command::Serve => serve(app_config).await,
        Command::Run {
            job,
            external_id,
            entry_id,
        } => run_job(app_config, job, external_id, entry_id).await,
        Command::CatalogAdd {
            external_id,
            title,
            year,
            alt_id,
        } => {
            let (catalog_store, _) = open_stores(&app_config)?;
            let entry = catalog_store.upsert_entry(&NewCatalogEntry {
                external_id,
                alt_id,
                title,
                year,
            })?;
            print_json_line(&entry)
        }
        Command::Settings => {
            let (_, server_store) = open_stores(&app_config)?;
            for setting in server_store.list_settings()? {
                print_json_line(&setting)?;
            }
            Ok(())
        }
        Command::SettingsSet { key, value } => {
            let (_, server_store) = open_stores(&app_config)?;
            let value = serde_json::from_str(&value).unwrap_or(JsonValue::String(value));
            let stored = update_setting(server_store.as_ref(), &key, &value)?;
            println!("{} = {}", key, stored);
            Ok(())
        }
        Command::Logs {
            job,
            status,
            external_id,
            limit,
        } => {
            let job = match job {
                Some(name) => Some(
                    IngestJob::parse(&name).with_context(|| format!("Unknown job: {}", name))?,
                ),
                None => None,
            };
            let status = match status {
                Some(value) => Some(
                    IngestStatus::parse(&value)
                        .with_context(|| format!("Unknown status: {}", value))?,
                ),
                None => None,
            };
            let (_, server_store) = open_stores(&app_config)?;
            let records = server_store.query_ingest_audit(&AuditQuery {
                job,
                status,
                external_id,
                limit,
                ..Default::default()
            })?;
            for record in records {
                print_json_line(&record)?;
            }
            Ok(())
        }
    }
}
