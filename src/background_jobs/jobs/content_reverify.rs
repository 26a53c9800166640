//! Content reverify job.
//!
//! Liveness-checks active streams that have not been verified within the grace
//! period, demotes broken ones and swaps in a replacement right away. Broken
//! records that stay unverified past the grace period are deleted.

use super::{broken_urls, store_error};
use crate::background_jobs::audit_logger::{AuditEvent, IngestAuditLogger};
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::catalog_store::{CatalogEntry, StreamCandidate};
use crate::provider::{gather_streams, ExternalIds};
use crate::server::metrics;
use crate::server_store::{AuditMetadata, IngestJob, IngestStatus};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};

pub const REVERIFY_JOB_ID: &str = "content.reverify";

pub struct ContentReverifyJob {
    cron: String,
}

#[derive(Debug, Default)]
struct ReverifyTotals {
    verified: usize,
    broken: usize,
    replaced: usize,
}

impl ContentReverifyJob {
    pub fn new(cron: impl Into<String>) -> Self {
        Self { cron: cron.into() }
    }

    /// Activates the first stream whose URL differs from the broken one and
    /// is not itself known broken. Provider priority decides what "first"
    /// means; quality does not.
    async fn replace(
        &self,
        ctx: &JobContext,
        entry: &CatalogEntry,
        broken: &StreamCandidate,
    ) -> anyhow::Result<Option<StreamCandidate>> {
        let streams = gather_streams(ctx.provider.as_ref(), &ExternalIds::from(entry)).await?;
        let known_broken = broken_urls(ctx, entry.id)?;
        let Some(stream) = streams
            .iter()
            .find(|s| s.url != broken.url && !known_broken.contains(&s.url))
        else {
            return Ok(None);
        };

        let replacement = ctx
            .stream_store
            .upsert_candidate(&stream.to_new_candidate(entry.id))?;
        ctx.stream_store
            .activate_candidate(entry.id, replacement.id)?;
        ctx.stream_store
            .set_superseded_by(broken.id, replacement.id)?;
        metrics::record_stream_activation("replacement");
        Ok(Some(replacement))
    }

    async fn reverify_candidate(
        &self,
        ctx: &JobContext,
        candidate: &StreamCandidate,
        audit: &IngestAuditLogger,
        totals: &mut ReverifyTotals,
    ) -> anyhow::Result<()> {
        let Some(entry) = ctx.catalog_store.get_entry(candidate.catalog_entry_id)? else {
            warn!(
                candidate_id = candidate.id,
                "Active candidate has no catalog entry, skipping"
            );
            return Ok(());
        };

        totals.verified += 1;
        if ctx.provider.verify_stream(&candidate.url).await {
            ctx.stream_store.mark_verified(candidate.id, Utc::now())?;
            return Ok(());
        }

        totals.broken += 1;
        ctx.stream_store.mark_broken(candidate.id, Utc::now())?;
        warn!(
            candidate_id = candidate.id,
            entry_id = entry.id,
            url = %candidate.url,
            "Stream is broken"
        );
        audit.event(
            IngestStatus::Error,
            format!("Stream marked as broken: {}", candidate.url),
            json!({
                "streamId": candidate.id,
                "url": candidate.url,
                "provider": candidate.provider,
                "quality": candidate.quality,
            }),
            AuditEvent {
                catalog_entry_id: Some(entry.id),
                external_id: Some(entry.external_id),
                error: Some("Stream failed liveness check".to_string()),
                metadata: Some(AuditMetadata {
                    provider: Some(candidate.provider.to_string()),
                    quality: Some(candidate.quality.to_string()),
                    url: Some(candidate.url.clone()),
                    ..Default::default()
                }),
            },
        );

        match self.replace(ctx, &entry, candidate).await? {
            Some(replacement) => {
                totals.replaced += 1;
                info!(
                    entry_id = entry.id,
                    broken = candidate.id,
                    replacement = replacement.id,
                    "Replaced broken stream with {} from {}",
                    replacement.quality,
                    replacement.provider
                );
            }
            None => info!(entry_id = entry.id, "No replacement stream available"),
        }
        Ok(())
    }

    async fn run(&self, ctx: &JobContext, audit: &IngestAuditLogger) -> Result<(), JobError> {
        let settings = ctx.load_settings()?;
        let grace = i64::try_from(settings.grace_period_hours)
            .ok()
            .and_then(Duration::try_hours)
            .ok_or_else(|| {
                JobError::Configuration(format!(
                    "GRACE_PERIOD_HOURS out of range: {}",
                    settings.grace_period_hours
                ))
            })?;
        let cutoff = Utc::now() - grace;

        let due = ctx
            .stream_store
            .list_active_unverified_since(cutoff)
            .map_err(store_error)?;
        info!("Reverifying {} active streams", due.len());

        let mut totals = ReverifyTotals::default();
        for candidate in &due {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            if let Err(e) = self
                .reverify_candidate(ctx, candidate, audit, &mut totals)
                .await
            {
                error!(
                    candidate_id = candidate.id,
                    "Failed to reverify stream: {:#}", e
                );
            }
        }

        let cleaned = ctx
            .stream_store
            .delete_broken_verified_before(Utc::now() - grace)
            .map_err(store_error)?;
        if cleaned > 0 {
            info!("Deleted {} long-broken stream candidates", cleaned);
        }

        audit.ok(
            format!(
                "Verified {} streams, {} broken",
                totals.verified, totals.broken
            ),
            json!({
                "verified": totals.verified,
                "broken": totals.broken,
                "replaced": totals.replaced,
                "cleaned": cleaned,
                "gracePeriodHours": settings.grace_period_hours,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl BackgroundJob for ContentReverifyJob {
    fn id(&self) -> &'static str {
        REVERIFY_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Content Reverify"
    }

    fn description(&self) -> &'static str {
        "Check that active streams still play and replace broken ones"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = IngestAuditLogger::new(ctx.server_store.clone(), IngestJob::Reverify);
        let result = ctx.within_deadline(self.run(ctx, &audit)).await;
        audit.finish(result)
    }
}
