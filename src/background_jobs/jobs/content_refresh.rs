//! Content refresh job.
//!
//! Scans active streams below the target quality and replaces each one with a
//! strictly better candidate when a provider has one.

use super::{broken_urls, store_error};
use crate::background_jobs::audit_logger::{AuditEvent, IngestAuditLogger};
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::catalog_store::StreamCandidate;
use crate::provider::{gather_streams, DiscoveredStream, ExternalIds};
use crate::quality::pick_best;
use crate::server::metrics;
use crate::server_store::{AuditMetadata, IngestJob, IngestStatus};
use crate::settings::PipelineSettings;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info};

pub const REFRESH_JOB_ID: &str = "content.refresh";

pub struct ContentRefreshJob {
    cron: String,
}

impl ContentRefreshJob {
    pub fn new(cron: impl Into<String>) -> Self {
        Self { cron: cron.into() }
    }

    /// Looks for a strictly better stream for one active candidate.
    /// Returns whether the entry was upgraded.
    async fn refresh_candidate(
        &self,
        ctx: &JobContext,
        current: &StreamCandidate,
        audit: &IngestAuditLogger,
    ) -> anyhow::Result<bool> {
        let Some(entry) = ctx.catalog_store.get_entry(current.catalog_entry_id)? else {
            debug!(
                candidate_id = current.id,
                "Active candidate has no catalog entry, skipping"
            );
            return Ok(false);
        };

        let streams = gather_streams(ctx.provider.as_ref(), &ExternalIds::from(&entry)).await?;
        let known_broken = broken_urls(ctx, entry.id)?;
        let better: Vec<DiscoveredStream> = streams
            .into_iter()
            .filter(|s| s.quality.is_better(current.quality) && !known_broken.contains(&s.url))
            .collect();
        let Some(best) = pick_best(&better) else {
            return Ok(false);
        };

        let upgraded = ctx
            .stream_store
            .upsert_candidate(&best.to_new_candidate(entry.id))?;
        if upgraded.id != current.id {
            ctx.stream_store.activate_candidate(entry.id, upgraded.id)?;
        }
        metrics::record_stream_activation("quality_upgrade");

        info!(
            entry_id = entry.id,
            old_candidate = current.id,
            new_candidate = upgraded.id,
            "Upgraded stream {} → {}",
            current.quality,
            upgraded.quality
        );
        audit.event(
            IngestStatus::Upgraded,
            format!(
                "Quality upgraded: {} → {}",
                current.quality, upgraded.quality
            ),
            json!({
                "oldQuality": current.quality,
                "newQuality": upgraded.quality,
                "provider": upgraded.provider,
            }),
            AuditEvent {
                catalog_entry_id: Some(entry.id),
                external_id: Some(entry.external_id),
                metadata: Some(AuditMetadata {
                    provider: Some(upgraded.provider.to_string()),
                    url: Some(upgraded.url.clone()),
                    old_quality: Some(current.quality.to_string()),
                    new_quality: Some(upgraded.quality.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        Ok(true)
    }

    async fn run(&self, ctx: &JobContext, audit: &IngestAuditLogger) -> Result<(), JobError> {
        let PipelineSettings { target_quality, .. } = ctx.load_settings()?;

        let candidates = ctx
            .stream_store
            .list_active_below(target_quality)
            .map_err(store_error)?;
        info!(
            "Refreshing {} active streams below {}",
            candidates.len(),
            target_quality
        );

        let mut checked = 0usize;
        let mut upgraded = 0usize;
        for candidate in &candidates {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            checked += 1;
            match self.refresh_candidate(ctx, candidate, audit).await {
                Ok(true) => upgraded += 1,
                Ok(false) => {}
                Err(e) => error!(
                    candidate_id = candidate.id,
                    entry_id = candidate.catalog_entry_id,
                    "Failed to refresh stream: {:#}",
                    e
                ),
            }
        }

        audit.ok(
            format!("Checked {} streams, upgraded {}", checked, upgraded),
            json!({
                "checked": checked,
                "upgraded": upgraded,
                "targetQuality": target_quality,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl BackgroundJob for ContentRefreshJob {
    fn id(&self) -> &'static str {
        REFRESH_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Content Refresh"
    }

    fn description(&self) -> &'static str {
        "Replace active streams below the target quality with better ones"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = IngestAuditLogger::new(ctx.server_store.clone(), IngestJob::Refresh);
        let result = ctx.within_deadline(self.run(ctx, &audit)).await;
        audit.finish(result)
    }
}
