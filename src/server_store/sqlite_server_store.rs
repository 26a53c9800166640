use super::models::{
    AuditMetadata, AuditQuery, IngestAuditRecord, IngestJob, IngestStatus, JobRun, JobRunStatus,
    JobScheduleState, NewIngestAuditRecord, PipelineSetting,
};
use super::schema::SERVER_VERSIONED_SCHEMAS;
use super::ServerStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

/// Saturates rather than wraps; SQLite reads a negative LIMIT as no limit.
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl SqliteServerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), SERVER_VERSIONED_SCHEMAS, "server")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fixed-width UTC timestamps, so string comparison in SQL orders correctly.
    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn row_to_setting(row: &rusqlite::Row) -> rusqlite::Result<PipelineSetting> {
        let value_str: String = row.get("value")?;
        let updated_at_str: String = row.get("updated_at")?;
        Ok(PipelineSetting {
            key: row.get("key")?,
            value: serde_json::from_str(&value_str).unwrap_or(JsonValue::String(value_str)),
            description: row.get("description")?,
            updated_at: parse_datetime(&updated_at_str).unwrap_or_else(Utc::now),
        })
    }

    fn row_to_audit_record(row: &rusqlite::Row) -> rusqlite::Result<IngestAuditRecord> {
        let job_str: String = row.get("job")?;
        let status_str: String = row.get("status")?;
        let payload_str: String = row.get("payload")?;
        let metadata_str: Option<String> = row.get("metadata")?;
        let created_at_str: String = row.get("created_at")?;

        let job = IngestJob::parse(&job_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown ingest job '{}'", job_str).into(),
            )
        })?;

        Ok(IngestAuditRecord {
            id: row.get("id")?,
            job,
            catalog_entry_id: row.get("catalog_entry_id")?,
            external_id: row.get("external_id")?,
            status: IngestStatus::parse(&status_str).unwrap_or(IngestStatus::Error),
            message: row.get("message")?,
            payload: serde_json::from_str(&payload_str).unwrap_or(JsonValue::Null),
            error: row.get("error")?,
            duration_ms: row.get("duration_ms")?,
            metadata: metadata_str.and_then(|s| serde_json::from_str::<AuditMetadata>(&s).ok()),
            created_at: parse_datetime(&created_at_str).unwrap_or_else(Utc::now),
        })
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            finished_at: finished_at_str.as_deref().and_then(parse_datetime),
            status: JobRunStatus::parse(&status_str).unwrap_or(JobRunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn row_to_schedule_state(row: &rusqlite::Row) -> rusqlite::Result<JobScheduleState> {
        let next_run_at_str: String = row.get("next_run_at")?;
        let last_run_at_str: Option<String> = row.get("last_run_at")?;

        Ok(JobScheduleState {
            job_id: row.get("job_id")?,
            next_run_at: parse_datetime(&next_run_at_str).unwrap_or_else(Utc::now),
            last_run_at: last_run_at_str.as_deref().and_then(parse_datetime),
        })
    }
}

const JOB_RUN_COLUMNS: &str =
    "id, job_id, started_at, finished_at, status, error_message, triggered_by";

impl ServerStore for SqliteServerStore {
    fn insert_setting_if_missing(
        &self,
        key: &str,
        value: &JsonValue,
        description: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO pipeline_settings (key, value, description, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key,
                value.to_string(),
                description,
                Self::format_datetime(&Utc::now())
            ],
        )?;
        Ok(inserted > 0)
    }

    fn get_setting(&self, key: &str) -> Result<Option<PipelineSetting>> {
        let conn = self.conn.lock().unwrap();
        let setting = conn
            .query_row(
                "SELECT key, value, description, updated_at FROM pipeline_settings WHERE key = ?1",
                params![key],
                Self::row_to_setting,
            )
            .optional()?;
        Ok(setting)
    }

    fn list_settings(&self) -> Result<Vec<PipelineSetting>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, value, description, updated_at FROM pipeline_settings ORDER BY key",
        )?;
        let settings = stmt
            .query_map([], Self::row_to_setting)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(settings)
    }

    fn set_setting(&self, key: &str, value: &JsonValue, description: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pipeline_settings (key, value, description, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = ?2, description = ?3, updated_at = ?4",
            params![
                key,
                value.to_string(),
                description,
                Self::format_datetime(&Utc::now())
            ],
        )
        .with_context(|| format!("Failed to store setting {}", key))?;
        Ok(())
    }

    fn log_ingest_audit(&self, record: &NewIngestAuditRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO ingest_audit_log
             (job, catalog_entry_id, external_id, status, message, payload, error, duration_ms, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.job.as_str(),
                record.catalog_entry_id,
                record.external_id,
                record.status.as_str(),
                record.message,
                record.payload.to_string(),
                record.error,
                record.duration_ms,
                metadata,
                Self::format_datetime(&Utc::now()),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query_ingest_audit(&self, query: &AuditQuery) -> Result<Vec<IngestAuditRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(job) = query.job {
            clauses.push("job = ?");
            values.push(SqlValue::Text(job.as_str().to_string()));
        }
        if let Some(status) = query.status {
            clauses.push("status = ?");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(external_id) = query.external_id {
            clauses.push("external_id = ?");
            values.push(SqlValue::Integer(external_id));
        }
        if let Some(entry_id) = query.catalog_entry_id {
            clauses.push("catalog_entry_id = ?");
            values.push(SqlValue::Integer(entry_id));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        values.push(SqlValue::Integer(sql_count(query.limit)));
        values.push(SqlValue::Integer(sql_count(query.offset)));

        let sql = format!(
            "SELECT id, job, catalog_entry_id, external_id, status, message, payload, error,
                    duration_ms, metadata, created_at
             FROM ingest_audit_log {}
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?",
            where_clause
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), Self::row_to_audit_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn cleanup_ingest_audit_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM ingest_audit_log WHERE created_at < ?1",
            params![Self::format_datetime(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                Self::format_datetime(&Utc::now()),
                JobRunStatus::Running.as_str(),
                triggered_by
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![
                Self::format_datetime(&Utc::now()),
                status.as_str(),
                error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    fn get_running_jobs(&self) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_runs WHERE status = ?1 ORDER BY started_at DESC",
            JOB_RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(
                params![JobRunStatus::Running.as_str()],
                Self::row_to_job_run,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
            JOB_RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![job_id, sql_count(limit)], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!(
                    "SELECT {} FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT 1",
                    JOB_RUN_COLUMNS
                ),
                params![job_id],
                Self::row_to_job_run,
            )
            .optional()?;
        Ok(run)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                Self::format_datetime(&Utc::now()),
                "Job was interrupted (process restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                Self::row_to_schedule_state,
            )
            .optional()?;
        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET next_run_at = ?2, last_run_at = ?3",
            params![
                state.job_id,
                Self::format_datetime(&state.next_run_at),
                state.last_run_at.as_ref().map(Self::format_datetime)
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteServerStore,
        _temp_dir: TempDir,
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("server.db");
        let store = SqliteServerStore::new(&db_path).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn audit(job: IngestJob, status: IngestStatus, external_id: Option<i64>) -> NewIngestAuditRecord {
        NewIngestAuditRecord {
            job,
            catalog_entry_id: None,
            external_id,
            status,
            message: format!("{} {}", job, status.as_str()),
            payload: json!({"n": 1}),
            error: None,
            duration_ms: 12,
            metadata: None,
        }
    }

    #[test]
    fn test_insert_setting_if_missing_keeps_existing_value() {
        let test = create_test_store();
        let store = &test.store;

        assert!(store
            .insert_setting_if_missing("TARGET_QUALITY", &json!("2160p"), "target")
            .unwrap());
        store
            .set_setting("TARGET_QUALITY", &json!("1080p"), "target")
            .unwrap();
        assert!(!store
            .insert_setting_if_missing("TARGET_QUALITY", &json!("2160p"), "target")
            .unwrap());

        let setting = store.get_setting("TARGET_QUALITY").unwrap().unwrap();
        assert_eq!(setting.value, json!("1080p"));
        assert_eq!(setting.description, "target");
    }

    #[test]
    fn test_settings_keep_json_types() {
        let test = create_test_store();
        let store = &test.store;

        store.set_setting("A_BOOL", &json!(true), "").unwrap();
        store.set_setting("A_NUMBER", &json!(3), "").unwrap();

        let settings = store.list_settings().unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings[0].key, "A_BOOL");
        assert_eq!(settings[0].value, json!(true));
        assert_eq!(settings[1].value, json!(3));
        assert!(store.get_setting("MISSING").unwrap().is_none());
    }

    #[test]
    fn test_audit_log_roundtrip_with_metadata() {
        let test = create_test_store();
        let store = &test.store;

        let mut record = audit(IngestJob::Refresh, IngestStatus::Upgraded, Some(603));
        record.catalog_entry_id = Some(1);
        record.metadata = Some(AuditMetadata {
            provider: Some("autoembed".to_string()),
            old_quality: Some("1080p".to_string()),
            new_quality: Some("2160p".to_string()),
            ..Default::default()
        });
        let id = store.log_ingest_audit(&record).unwrap();
        assert!(id > 0);

        let records = store.query_ingest_audit(&AuditQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        let stored = &records[0];
        assert_eq!(stored.job, IngestJob::Refresh);
        assert_eq!(stored.status, IngestStatus::Upgraded);
        assert_eq!(stored.external_id, Some(603));
        assert_eq!(stored.payload, json!({"n": 1}));
        assert_eq!(
            stored.metadata.as_ref().unwrap().new_quality.as_deref(),
            Some("2160p")
        );
    }

    #[test]
    fn test_audit_query_filters_and_order() {
        let test = create_test_store();
        let store = &test.store;

        store
            .log_ingest_audit(&audit(IngestJob::Match, IngestStatus::Skip, Some(1)))
            .unwrap();
        store
            .log_ingest_audit(&audit(IngestJob::Match, IngestStatus::Ok, Some(2)))
            .unwrap();
        store
            .log_ingest_audit(&audit(IngestJob::Discover, IngestStatus::Ok, None))
            .unwrap();

        let matches = store
            .query_ingest_audit(&AuditQuery {
                job: Some(IngestJob::Match),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].external_id, Some(2));

        let ok = store
            .query_ingest_audit(&AuditQuery {
                status: Some(IngestStatus::Ok),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ok.len(), 2);

        let by_external = store
            .query_ingest_audit(&AuditQuery {
                external_id: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_external.len(), 1);
        assert_eq!(by_external[0].status, IngestStatus::Skip);

        let paged = store
            .query_ingest_audit(&AuditQuery {
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].external_id, Some(2));
    }

    #[test]
    fn test_audit_cleanup_before_cutoff() {
        let test = create_test_store();
        let store = &test.store;

        store
            .log_ingest_audit(&audit(IngestJob::Reverify, IngestStatus::Ok, None))
            .unwrap();

        let removed = store
            .cleanup_ingest_audit_before(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .cleanup_ingest_audit_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .query_ingest_audit(&AuditQuery::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_record_job_start_and_finish() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store.record_job_start("content.match", "manual").unwrap();
        let running = store.get_running_jobs().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].status, JobRunStatus::Running);

        store
            .record_job_finish(run_id, JobRunStatus::Failed, Some("boom".to_string()))
            .unwrap();
        assert!(store.get_running_jobs().unwrap().is_empty());

        let last = store.get_last_run("content.match").unwrap().unwrap();
        assert_eq!(last.status, JobRunStatus::Failed);
        assert_eq!(last.error_message.as_deref(), Some("boom"));
        assert!(last.finished_at.is_some());
    }

    #[test]
    fn test_job_history_limit() {
        let test = create_test_store();
        let store = &test.store;

        for _ in 0..5 {
            let id = store.record_job_start("tmdb.discover", "schedule").unwrap();
            store
                .record_job_finish(id, JobRunStatus::Completed, None)
                .unwrap();
        }
        assert_eq!(store.get_job_history("tmdb.discover", 3).unwrap().len(), 3);
        assert!(store.get_last_run("unknown").unwrap().is_none());
    }

    #[test]
    fn test_mark_stale_jobs_failed() {
        let test = create_test_store();
        let store = &test.store;

        store.record_job_start("a", "schedule").unwrap();
        store.record_job_start("b", "schedule").unwrap();

        assert_eq!(store.mark_stale_jobs_failed().unwrap(), 2);
        assert!(store.get_running_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_schedule_state_upsert() {
        let test = create_test_store();
        let store = &test.store;

        assert!(store.get_schedule_state("cleanup").unwrap().is_none());

        let next = Utc::now() + chrono::Duration::hours(1);
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "cleanup".to_string(),
                next_run_at: next,
                last_run_at: None,
            })
            .unwrap();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "cleanup".to_string(),
                next_run_at: next,
                last_run_at: Some(Utc::now()),
            })
            .unwrap();

        let state = store.get_schedule_state("cleanup").unwrap().unwrap();
        assert_eq!(state.next_run_at.timestamp(), next.timestamp());
        assert!(state.last_run_at.is_some());
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("server.db");
        {
            let store = SqliteServerStore::new(&db_path).unwrap();
            store.set_setting("K", &json!("v"), "d").unwrap();
        }
        let store = SqliteServerStore::new(&db_path).unwrap();
        assert_eq!(store.get_setting("K").unwrap().unwrap().value, json!("v"));
    }
}
