//! The pipeline jobs and their housekeeping.

pub mod audit_log_cleanup;
pub mod content_match;
pub mod content_refresh;
pub mod content_reverify;
pub mod discovery;

pub use audit_log_cleanup::AuditLogCleanupJob;
pub use content_match::{ContentMatchJob, MatchRequest};
pub use content_refresh::ContentRefreshJob;
pub use content_reverify::ContentReverifyJob;
pub use discovery::DiscoveryJob;

use super::context::JobContext;
use super::handle::JobQueue;
use super::job::JobError;
use super::scheduler::JobScheduler;
use crate::settings::PipelineSettings;
use std::collections::HashSet;
use std::sync::Arc;

/// Process-level knobs of the pipeline jobs. Cron expressions come from
/// the pipeline settings instead.
#[derive(Debug, Clone)]
pub struct PipelineJobsConfig {
    pub match_concurrency: usize,
    pub audit_retention_days: u64,
    pub audit_cleanup_interval_hours: u64,
}

impl Default for PipelineJobsConfig {
    fn default() -> Self {
        Self {
            match_concurrency: content_match::DEFAULT_MATCH_CONCURRENCY,
            audit_retention_days: audit_log_cleanup::DEFAULT_AUDIT_RETENTION_DAYS,
            audit_cleanup_interval_hours: audit_log_cleanup::DEFAULT_CLEANUP_INTERVAL_HOURS,
        }
    }
}

/// Registers the four pipeline jobs and audit cleanup. Discovery feeds match
/// runs into `queue`, normally the scheduler's own handle.
pub async fn register_pipeline_jobs(
    scheduler: &mut JobScheduler,
    queue: Arc<dyn JobQueue>,
    settings: &PipelineSettings,
    config: &PipelineJobsConfig,
) {
    scheduler
        .register_job(Arc::new(DiscoveryJob::new(
            settings.discover_cron.clone(),
            queue,
        )))
        .await;
    scheduler
        .register_job(Arc::new(ContentMatchJob::new(config.match_concurrency)))
        .await;
    scheduler
        .register_job(Arc::new(ContentRefreshJob::new(settings.refresh_cron.clone())))
        .await;
    scheduler
        .register_job(Arc::new(ContentReverifyJob::new(settings.reverify_cron.clone())))
        .await;
    scheduler
        .register_job(Arc::new(AuditLogCleanupJob::new(
            config.audit_retention_days,
            config.audit_cleanup_interval_hours,
        )))
        .await;
}

/// Store failures keep their whole context chain in the run's error message.
pub(crate) fn store_error(e: anyhow::Error) -> JobError {
    JobError::ExecutionFailed(format!("{:#}", e))
}

/// URLs of the entry's candidates that failed their last liveness check.
/// They are not picked again until the sweep removes them.
pub(crate) fn broken_urls(ctx: &JobContext, catalog_entry_id: i64) -> anyhow::Result<HashSet<String>> {
    Ok(ctx
        .stream_store
        .list_candidates(catalog_entry_id)?
        .into_iter()
        .filter(|c| c.is_broken)
        .map(|c| c.url)
        .collect())
}
