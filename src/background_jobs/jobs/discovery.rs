//! Catalog discovery job.
//!
//! Polls every discovery facet, diffs the ids against the catalog and queues a
//! match run for each id the catalog does not know yet.

use super::content_match::{MatchRequest, MATCH_JOB_ID};
use super::store_error;
use crate::background_jobs::audit_logger::IngestAuditLogger;
use crate::background_jobs::{
    context::JobContext,
    handle::JobQueue,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::discovery::DiscoveryFacet;
use crate::server_store::IngestJob;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub const DISCOVERY_JOB_ID: &str = "tmdb.discover";

pub struct DiscoveryJob {
    cron: String,
    queue: Arc<dyn JobQueue>,
}

impl DiscoveryJob {
    pub fn new(cron: impl Into<String>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            cron: cron.into(),
            queue,
        }
    }

    /// Union of the ids of every facet that answered.
    async fn collect_ids(&self, ctx: &JobContext) -> BTreeSet<i64> {
        let lookups = DiscoveryFacet::ALL.iter().map(|facet| async move {
            (*facet, ctx.discovery.discover(*facet).await)
        });

        let mut ids = BTreeSet::new();
        for (facet, result) in join_all(lookups).await {
            match result {
                Ok(found) => {
                    info!(facet = %facet, "Discovered {} ids", found.len());
                    ids.extend(found);
                }
                Err(e) => warn!(facet = %facet, "Discovery facet failed: {}", e),
            }
        }
        ids
    }

    async fn run(&self, ctx: &JobContext, audit: &IngestAuditLogger) -> Result<(), JobError> {
        if !ctx.discovery.has_credentials() {
            return Err(JobError::Configuration(
                "TMDB API key not configured".to_string(),
            ));
        }

        let discovered = self.collect_ids(ctx).await;
        let ids: Vec<i64> = discovered.iter().copied().collect();
        let existing = ctx
            .catalog_store
            .find_existing_external_ids(&ids)
            .map_err(store_error)?;
        let new_ids: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !existing.contains(id))
            .collect();

        let mut enqueue_failures = 0usize;
        for external_id in &new_ids {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let params = MatchRequest::by_external_id(*external_id).to_params();
            if let Err(e) = self
                .queue
                .enqueue(MATCH_JOB_ID, Some(params), DISCOVERY_JOB_ID)
                .await
            {
                enqueue_failures += 1;
                warn!(external_id, "Failed to enqueue match: {}", e);
            }
        }

        info!(
            "Discovered {} ids, {} new, {} already in catalog",
            ids.len(),
            new_ids.len(),
            existing.len()
        );
        audit.ok(
            format!("Discovered {} IDs, {} new", ids.len(), new_ids.len()),
            json!({
                "totalDiscovered": ids.len(),
                "newIds": new_ids.len(),
                "existingIds": existing.len(),
                "enqueueFailures": enqueue_failures,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl BackgroundJob for DiscoveryJob {
    fn id(&self) -> &'static str {
        DISCOVERY_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Catalog Discovery"
    }

    fn description(&self) -> &'static str {
        "Poll the discovery API and queue matches for titles not yet in the catalog"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = IngestAuditLogger::new(ctx.server_store.clone(), IngestJob::Discover);
        let result = ctx.within_deadline(self.run(ctx, &audit)).await;
        audit.finish(result)
    }
}
