//! Content match job.
//!
//! Resolves one catalog entry to stream candidates across every provider,
//! stores the publishable ones and decides which candidate is active.

use super::store_error;
use crate::background_jobs::audit_logger::IngestAuditLogger;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::catalog_store::{CatalogEntry, StreamCandidate};
use crate::provider::{gather_streams, ExternalIds};
use crate::quality::{pick_best, Quality};
use crate::server::metrics;
use crate::server_store::{AuditMetadata, IngestJob};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

pub const MATCH_JOB_ID: &str = "content.match";

/// Default number of match runs allowed in flight at once.
pub const DEFAULT_MATCH_CONCURRENCY: usize = 2;

/// Which entry a match run is for. At least one field is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchRequest {
    pub external_id: Option<i64>,
    pub catalog_entry_id: Option<i64>,
}

fn json_id(value: Option<&JsonValue>) -> Option<i64> {
    match value? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl MatchRequest {
    pub fn by_external_id(external_id: i64) -> Self {
        Self {
            external_id: Some(external_id),
            catalog_entry_id: None,
        }
    }

    pub fn by_entry_id(catalog_entry_id: i64) -> Self {
        Self {
            external_id: None,
            catalog_entry_id: Some(catalog_entry_id),
        }
    }

    /// Reads `{externalId?, catalogEntryId?}`. Ids may be numbers or numeric strings.
    pub fn from_params(params: Option<&JsonValue>) -> Result<Self, JobError> {
        let request = Self {
            external_id: json_id(params.and_then(|p| p.get("externalId"))),
            catalog_entry_id: json_id(params.and_then(|p| p.get("catalogEntryId"))),
        };
        if request.external_id.is_none() && request.catalog_entry_id.is_none() {
            return Err(JobError::InvalidArgument(
                "Either externalId or catalogEntryId is required".to_string(),
            ));
        }
        Ok(request)
    }

    pub fn to_params(&self) -> JsonValue {
        let mut params = serde_json::Map::new();
        if let Some(id) = self.external_id {
            params.insert("externalId".to_string(), json!(id));
        }
        if let Some(id) = self.catalog_entry_id {
            params.insert("catalogEntryId".to_string(), json!(id));
        }
        JsonValue::Object(params)
    }
}

/// Why the active candidate changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationReason {
    FirstAvailable,
    /// Any quality change, downgrades included.
    QualityChange,
    QualityUpgrade,
}

impl ActivationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationReason::FirstAvailable => "first_available",
            ActivationReason::QualityChange => "quality_change",
            ActivationReason::QualityUpgrade => "quality_upgrade",
        }
    }

    pub fn describe(&self, current: Option<Quality>, best: Quality) -> String {
        let from = current.map(|q| q.as_str()).unwrap_or("none");
        match self {
            ActivationReason::FirstAvailable => "First available stream".to_string(),
            ActivationReason::QualityChange => format!("Quality change: {} → {}", from, best),
            ActivationReason::QualityUpgrade => format!("Quality upgrade: {} → {}", from, best),
        }
    }
}

/// Whether the best candidate should replace the current active one.
///
/// Only the quality grade counts; a same-grade candidate with a higher score
/// never displaces the active one.
pub fn decide_activation(
    current: Option<Quality>,
    best: Quality,
    allow_lower_quality_until_upgrade: bool,
) -> Option<ActivationReason> {
    match current {
        None => Some(ActivationReason::FirstAvailable),
        Some(current) if current == best => None,
        Some(_) if allow_lower_quality_until_upgrade => Some(ActivationReason::QualityChange),
        Some(current) if best.is_better(current) => Some(ActivationReason::QualityUpgrade),
        Some(_) => None,
    }
}

pub struct ContentMatchJob {
    max_concurrent_runs: usize,
}

impl ContentMatchJob {
    pub fn new(max_concurrent_runs: usize) -> Self {
        Self {
            max_concurrent_runs: max_concurrent_runs.max(1),
        }
    }

    /// Finds the entry the request points at. `Ok(None)` means "not imported yet".
    fn resolve_entry(
        &self,
        ctx: &JobContext,
        request: &MatchRequest,
    ) -> Result<Option<CatalogEntry>, JobError> {
        if let Some(external_id) = request.external_id {
            return ctx
                .catalog_store
                .get_entry_by_external_id(external_id)
                .map_err(store_error);
        }

        let entry_id = request.catalog_entry_id.ok_or_else(|| {
            JobError::InvalidArgument("Either externalId or catalogEntryId is required".to_string())
        })?;
        match ctx.catalog_store.get_entry(entry_id).map_err(store_error)? {
            Some(entry) => Ok(Some(entry)),
            None => Err(JobError::ExecutionFailed(format!(
                "Catalog entry {} not found",
                entry_id
            ))),
        }
    }

    async fn run(
        &self,
        ctx: &JobContext,
        request: &MatchRequest,
        audit: &mut IngestAuditLogger,
    ) -> Result<(), JobError> {
        let Some(entry) = self.resolve_entry(ctx, request)? else {
            let external_id = request.external_id.unwrap_or_default();
            info!(external_id, "Catalog entry not imported yet, skipping match");
            audit.skip(format!(
                "Catalog entry with external id {} not found",
                external_id
            ));
            return Ok(());
        };
        audit.set_entry(Some(entry.id), Some(entry.external_id));

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let settings = ctx.load_settings()?;
        info!(entry_id = entry.id, title = %entry.title, "Matching streams");

        let streams = gather_streams(ctx.provider.as_ref(), &ExternalIds::from(&entry))
            .await
            .map_err(|e| JobError::InvalidArgument(e.to_string()))?;
        if streams.is_empty() {
            info!(entry_id = entry.id, "No streaming sources found");
            audit.skip("No streaming sources found");
            return Ok(());
        }

        let minimum = settings.min_quality_to_publish;
        let publishable: Vec<_> = streams
            .iter()
            .filter(|s| s.quality.meets_minimum(minimum))
            .collect();
        if publishable.is_empty() {
            info!(
                entry_id = entry.id,
                total = streams.len(),
                "No streams meet minimum quality {}",
                minimum
            );
            audit.skip(format!("No streams meet minimum quality: {}", minimum));
            return Ok(());
        }

        let mut stored: Vec<StreamCandidate> = Vec::with_capacity(publishable.len());
        for stream in &publishable {
            match ctx
                .stream_store
                .upsert_candidate(&stream.to_new_candidate(entry.id))
            {
                Ok(candidate) => stored.push(candidate),
                Err(e) => warn!(url = %stream.url, "Failed to upsert stream candidate: {:#}", e),
            }
        }

        if stored.is_empty() {
            return Err(JobError::ExecutionFailed(
                "Failed to store any stream candidate".to_string(),
            ));
        }
        // Rows reverify marked broken stay out until the sweep removes them.
        stored.retain(|c| !c.is_broken);
        let Some(best) = pick_best(&stored).cloned() else {
            info!(entry_id = entry.id, "Every publishable stream is marked broken");
            audit.skip("All publishable streams are marked broken");
            return Ok(());
        };
        let current = ctx
            .stream_store
            .get_active_candidate(entry.id)
            .map_err(store_error)?;
        let current_quality = current.as_ref().map(|c| c.quality);

        let decision = decide_activation(
            current_quality,
            best.quality,
            settings.allow_lower_quality_until_upgrade,
        );
        if let Some(reason) = decision {
            ctx.stream_store
                .activate_candidate(entry.id, best.id)
                .map_err(store_error)?;
            metrics::record_stream_activation(reason.as_str());
            info!(
                entry_id = entry.id,
                candidate_id = best.id,
                provider = %best.provider,
                "Activated {} stream ({})",
                best.quality,
                reason.as_str()
            );
        }

        let activation_reason = decision
            .map(|reason| reason.describe(current_quality, best.quality))
            .unwrap_or_default();
        audit.ok_with_metadata(
            format!(
                "Found {} streams, {} publishable",
                streams.len(),
                publishable.len()
            ),
            json!({
                "totalStreams": streams.len(),
                "publishableStreams": publishable.len(),
                "bestQuality": best.quality,
                "activated": decision.is_some(),
                "activationReason": activation_reason,
            }),
            AuditMetadata {
                provider: Some(best.provider.to_string()),
                quality: Some(best.quality.to_string()),
                url: Some(best.url.clone()),
                ..Default::default()
            },
        );
        Ok(())
    }
}

impl Default for ContentMatchJob {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_CONCURRENCY)
    }
}

#[async_trait]
impl BackgroundJob for ContentMatchJob {
    fn id(&self) -> &'static str {
        MATCH_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Content Match"
    }

    fn description(&self) -> &'static str {
        "Find stream candidates for one catalog entry and pick the active stream"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Manual
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn max_concurrent_runs(&self) -> usize {
        self.max_concurrent_runs
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.execute_with_params(ctx, None).await
    }

    async fn execute_with_params(
        &self,
        ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        let mut audit = IngestAuditLogger::new(ctx.server_store.clone(), IngestJob::Match);
        let request = match MatchRequest::from_params(params.as_ref()) {
            Ok(request) => request,
            Err(e) => return audit.finish(Err(e)),
        };
        audit.set_entry(request.catalog_entry_id, request.external_id);

        let result = ctx
            .within_deadline(self.run(ctx, &request, &mut audit))
            .await;
        audit.finish(result)
    }
}
