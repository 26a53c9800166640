use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_AUDIT_RETENTION_DAYS: u64 = 30;
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: u64 = 24;

/// Deletes ingest audit records past the retention window.
pub struct AuditLogCleanupJob {
    retention_days: u64,
    interval_hours: u64,
}

impl AuditLogCleanupJob {
    pub fn new(retention_days: u64, interval_hours: u64) -> Self {
        Self {
            retention_days,
            interval_hours: interval_hours.max(1),
        }
    }
}

impl Default for AuditLogCleanupJob {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_RETENTION_DAYS, DEFAULT_CLEANUP_INTERVAL_HOURS)
    }
}

#[async_trait]
impl BackgroundJob for AuditLogCleanupJob {
    fn id(&self) -> &'static str {
        "audit_log_cleanup"
    }

    fn name(&self) -> &'static str {
        "Audit Log Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete ingest audit records older than the retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(self.interval_hours.saturating_mul(3600)))
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let retention = i64::try_from(self.retention_days)
            .ok()
            .and_then(ChronoDuration::try_days)
            .ok_or_else(|| {
                JobError::Configuration(format!(
                    "audit_retention_days out of range: {}",
                    self.retention_days
                ))
            })?;
        let cutoff = Utc::now() - retention;
        let deleted = ctx
            .server_store
            .cleanup_ingest_audit_before(cutoff)
            .map_err(super::store_error)?;

        info!(
            "Deleted {} audit records older than {} days",
            deleted, self.retention_days
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::test_support::TestHarness;
    use crate::server_store::{AuditQuery, IngestJob, IngestStatus, NewIngestAuditRecord, ServerStore};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_schedule_uses_interval_hours() {
        let job = AuditLogCleanupJob::new(30, 6);
        assert_eq!(
            job.schedule(),
            JobSchedule::Interval(Duration::from_secs(6 * 3600))
        );
        assert_eq!(
            AuditLogCleanupJob::new(30, 0).schedule(),
            JobSchedule::Interval(Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn test_recent_records_survive_cleanup() {
        let harness = TestHarness::new();
        harness
            .server_store
            .log_ingest_audit(&NewIngestAuditRecord {
                job: IngestJob::Match,
                catalog_entry_id: None,
                external_id: Some(603),
                status: IngestStatus::Skip,
                message: "Catalog entry with external id 603 not found".to_string(),
                payload: json!({}),
                error: None,
                duration_ms: 3,
                metadata: None,
            })
            .unwrap();

        let ctx = harness.context(CancellationToken::new());
        AuditLogCleanupJob::default().execute(&ctx).await.unwrap();

        let records = harness
            .server_store
            .query_ingest_audit(&AuditQuery::default())
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_retention_is_a_configuration_error() {
        let harness = TestHarness::new();
        let ctx = harness.context(CancellationToken::new());

        let result = AuditLogCleanupJob::new(u64::MAX, 24).execute(&ctx).await;

        assert!(matches!(result, Err(JobError::Configuration(_))));
    }
}
