use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub scheduler_enabled: Option<bool>,

    // Discovery API
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: Option<String>,
    pub discovery_timeout_secs: Option<u64>,

    // Provider requests
    pub provider_timeout_secs: Option<u64>,
    pub verify_timeout_secs: Option<u64>,
    pub retry_initial_backoff_ms: Option<u64>,
    pub retry_max_backoff_ms: Option<u64>,
    pub retry_backoff_multiplier: Option<f64>,

    // Jobs
    pub job_timeout_secs: Option<u64>,
    pub match_concurrency: Option<usize>,
    pub audit_retention_days: Option<u64>,
    pub audit_cleanup_interval_hours: Option<u64>,

    /// Base URL overrides keyed by provider name (`autoembed`, `2embed`, ...).
    pub providers: Option<HashMap<String, String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
