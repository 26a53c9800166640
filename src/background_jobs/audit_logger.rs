//! Writes ingest audit records for one job run.

use super::job::JobError;
use crate::server::metrics;
use crate::server_store::{
    AuditMetadata, IngestJob, IngestStatus, NewIngestAuditRecord, ServerStore,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Audit writer bound to one run of one job. `duration_ms` of every record is
/// measured from the logger's creation.
///
/// A failing audit sink is logged and otherwise ignored; it never fails the run.
pub struct IngestAuditLogger {
    server_store: Arc<dyn ServerStore>,
    job: IngestJob,
    started_at: Instant,
    catalog_entry_id: Option<i64>,
    external_id: Option<i64>,
}

/// Optional fields of a record beyond status, message and payload.
#[derive(Debug, Clone, Default)]
pub struct AuditEvent {
    pub catalog_entry_id: Option<i64>,
    pub external_id: Option<i64>,
    pub error: Option<String>,
    pub metadata: Option<AuditMetadata>,
}

impl IngestAuditLogger {
    pub fn new(server_store: Arc<dyn ServerStore>, job: IngestJob) -> Self {
        Self {
            server_store,
            job,
            started_at: Instant::now(),
            catalog_entry_id: None,
            external_id: None,
        }
    }

    /// Logger for a run that started at `started_at` rather than now.
    pub fn started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Attaches the entry the run is about to every top-level record.
    pub fn set_entry(&mut self, catalog_entry_id: Option<i64>, external_id: Option<i64>) {
        self.catalog_entry_id = catalog_entry_id;
        self.external_id = external_id;
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.started_at.elapsed().as_millis() as i64
    }

    pub fn ok(&self, message: impl Into<String>, payload: JsonValue) {
        self.top_level(IngestStatus::Ok, message.into(), payload, None, None);
    }

    pub fn ok_with_metadata(
        &self,
        message: impl Into<String>,
        payload: JsonValue,
        metadata: AuditMetadata,
    ) {
        self.top_level(IngestStatus::Ok, message.into(), payload, None, Some(metadata));
    }

    pub fn skip(&self, message: impl Into<String>) {
        self.top_level(IngestStatus::Skip, message.into(), json!({}), None, None);
    }

    /// Top-level failure record. `detail` carries the full error chain.
    pub fn error(&self, message: impl Into<String>, detail: impl Into<String>) {
        self.top_level(
            IngestStatus::Error,
            message.into(),
            json!({}),
            Some(detail.into()),
            None,
        );
    }

    /// Writes the ERROR record for a failed run and hands the result back.
    pub fn finish(&self, result: Result<(), JobError>) -> Result<(), JobError> {
        if let Err(e) = &result {
            self.error(e.to_string(), format!("{:?}", e));
        }
        result
    }

    /// A record about one item inside the run (an upgrade, a break).
    pub fn event(
        &self,
        status: IngestStatus,
        message: impl Into<String>,
        payload: JsonValue,
        event: AuditEvent,
    ) {
        self.write(NewIngestAuditRecord {
            job: self.job,
            catalog_entry_id: event.catalog_entry_id,
            external_id: event.external_id,
            status,
            message: message.into(),
            payload,
            error: event.error,
            duration_ms: self.elapsed_ms(),
            metadata: event.metadata,
        });
    }

    fn top_level(
        &self,
        status: IngestStatus,
        message: String,
        payload: JsonValue,
        error: Option<String>,
        metadata: Option<AuditMetadata>,
    ) {
        self.write(NewIngestAuditRecord {
            job: self.job,
            catalog_entry_id: self.catalog_entry_id,
            external_id: self.external_id,
            status,
            message,
            payload,
            error,
            duration_ms: self.elapsed_ms(),
            metadata,
        });
    }

    fn write(&self, record: NewIngestAuditRecord) {
        metrics::record_audit_record(record.job.as_str(), record.status.as_str());
        if let Err(e) = self.server_store.log_ingest_audit(&record) {
            error!(
                job = %record.job,
                status = record.status.as_str(),
                "Failed to write ingest audit record: {:#}",
                e
            );
        }
    }
}
