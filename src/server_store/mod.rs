mod models;
mod schema;
mod sqlite_server_store;

pub use models::*;
pub use schema::SERVER_VERSIONED_SCHEMAS;
pub use sqlite_server_store::SqliteServerStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Server-side state: pipeline settings, the ingest audit log and job bookkeeping.
pub trait ServerStore: Send + Sync {
    // Pipeline settings
    /// Inserts the setting only if the key is absent. Returns true if inserted.
    fn insert_setting_if_missing(
        &self,
        key: &str,
        value: &JsonValue,
        description: &str,
    ) -> Result<bool>;
    fn get_setting(&self, key: &str) -> Result<Option<PipelineSetting>>;
    fn list_settings(&self) -> Result<Vec<PipelineSetting>>;
    fn set_setting(&self, key: &str, value: &JsonValue, description: &str) -> Result<()>;

    // Ingest audit log
    fn log_ingest_audit(&self, record: &NewIngestAuditRecord) -> Result<i64>;
    fn query_ingest_audit(&self, query: &AuditQuery) -> Result<Vec<IngestAuditRecord>>;
    fn cleanup_ingest_audit_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // Job runs
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_running_jobs(&self) -> Result<Vec<JobRun>>;
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    fn mark_stale_jobs_failed(&self) -> Result<usize>;

    // Schedule state
    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>>;
    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()>;
}
