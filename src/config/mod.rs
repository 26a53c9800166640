mod file_config;

pub use file_config::FileConfig;

use crate::discovery::DEFAULT_TMDB_BASE_URL;
use crate::provider::{Provider, ProviderAdapterConfig, RetryPolicy};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3002;
pub const TMDB_API_KEY_ENV: &str = "TMDB_API_KEY";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub scheduler_enabled: bool,
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub discovery_timeout_secs: u64,
    pub provider_timeout_secs: u64,
    pub verify_timeout_secs: u64,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub job_timeout_secs: u64,
    pub match_concurrency: usize,
    pub audit_retention_days: u64,
    pub audit_cleanup_interval_hours: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            port: DEFAULT_PORT,
            logging_level: RequestsLoggingLevel::Path,
            scheduler_enabled: true,
            tmdb_api_key: None,
            tmdb_base_url: DEFAULT_TMDB_BASE_URL.to_string(),
            discovery_timeout_secs: 10,
            provider_timeout_secs: 10,
            verify_timeout_secs: 10,
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 5000,
            retry_backoff_multiplier: 2.0,
            job_timeout_secs: 1800,
            match_concurrency: 2,
            audit_retention_days: 30,
            audit_cleanup_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub scheduler_enabled: bool,

    // Discovery API
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub discovery_timeout: Duration,

    // Provider requests
    pub provider_timeout: Duration,
    pub verify_timeout: Duration,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub retry_backoff_multiplier: f64,
    pub provider_base_urls: HashMap<Provider, String>,

    // Jobs
    pub job_timeout: Duration,
    pub match_concurrency: usize,
    pub audit_retention_days: u64,
    pub audit_cleanup_interval_hours: u64,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());
        let scheduler_enabled = file.scheduler_enabled.unwrap_or(cli.scheduler_enabled);

        let tmdb_api_key = file
            .tmdb_api_key
            .or_else(|| cli.tmdb_api_key.clone())
            .or_else(|| std::env::var(TMDB_API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty());
        let tmdb_base_url = file
            .tmdb_base_url
            .unwrap_or_else(|| cli.tmdb_base_url.clone());

        let retry_backoff_multiplier = file
            .retry_backoff_multiplier
            .unwrap_or(cli.retry_backoff_multiplier);
        if retry_backoff_multiplier.is_nan() || retry_backoff_multiplier < 1.0 {
            bail!(
                "retry_backoff_multiplier must be at least 1.0, got {}",
                retry_backoff_multiplier
            );
        }

        let mut provider_base_urls = HashMap::new();
        for (name, url) in file.providers.unwrap_or_default() {
            let Some(provider) = Provider::parse(&name) else {
                bail!("Unknown provider in [providers]: {}", name);
            };
            provider_base_urls.insert(provider, url);
        }

        Ok(Self {
            db_dir,
            port,
            logging_level,
            scheduler_enabled,
            tmdb_api_key,
            tmdb_base_url,
            discovery_timeout: Duration::from_secs(
                file.discovery_timeout_secs
                    .unwrap_or(cli.discovery_timeout_secs),
            ),
            provider_timeout: Duration::from_secs(
                file.provider_timeout_secs
                    .unwrap_or(cli.provider_timeout_secs),
            ),
            verify_timeout: Duration::from_secs(
                file.verify_timeout_secs.unwrap_or(cli.verify_timeout_secs),
            ),
            retry_initial_backoff: Duration::from_millis(
                file.retry_initial_backoff_ms
                    .unwrap_or(cli.retry_initial_backoff_ms),
            ),
            retry_max_backoff: Duration::from_millis(
                file.retry_max_backoff_ms.unwrap_or(cli.retry_max_backoff_ms),
            ),
            retry_backoff_multiplier,
            provider_base_urls,
            job_timeout: Duration::from_secs(
                file.job_timeout_secs.unwrap_or(cli.job_timeout_secs),
            ),
            match_concurrency: file
                .match_concurrency
                .unwrap_or(cli.match_concurrency)
                .max(1),
            audit_retention_days: file
                .audit_retention_days
                .unwrap_or(cli.audit_retention_days),
            audit_cleanup_interval_hours: file
                .audit_cleanup_interval_hours
                .unwrap_or(cli.audit_cleanup_interval_hours),
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }

    /// Adapter settings; rate limit and retry count are replaced by pipeline
    /// settings at the start of every run.
    pub fn provider_adapter_config(&self) -> ProviderAdapterConfig {
        ProviderAdapterConfig {
            request_timeout: self.provider_timeout,
            verify_timeout: self.verify_timeout,
            retry: RetryPolicy {
                initial_backoff: self.retry_initial_backoff,
                max_backoff: self.retry_max_backoff,
                backoff_multiplier: self.retry_backoff_multiplier,
                ..RetryPolicy::default()
            },
            base_urls: self.provider_base_urls.clone(),
            ..ProviderAdapterConfig::default()
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
