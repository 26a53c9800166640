use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

// =============================================================================
// Pipeline settings
// =============================================================================

/// A stored pipeline setting. `value` keeps its JSON type (string, bool or number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSetting {
    pub key: String,
    pub value: JsonValue,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Ingest audit log
// =============================================================================

/// The four pipeline jobs, named as they appear in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestJob {
    #[serde(rename = "tmdb.discover")]
    Discover,
    #[serde(rename = "content.match")]
    Match,
    #[serde(rename = "content.refresh")]
    Refresh,
    #[serde(rename = "content.reverify")]
    Reverify,
}

impl IngestJob {
    pub const ALL: [IngestJob; 4] = [
        IngestJob::Discover,
        IngestJob::Match,
        IngestJob::Refresh,
        IngestJob::Reverify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestJob::Discover => "tmdb.discover",
            IngestJob::Match => "content.match",
            IngestJob::Refresh => "content.refresh",
            IngestJob::Reverify => "content.reverify",
        }
    }

    /// Short name used on the command line.
    pub fn short_name(&self) -> &'static str {
        match self {
            IngestJob::Discover => "discovery",
            IngestJob::Match => "match",
            IngestJob::Refresh => "refresh",
            IngestJob::Reverify => "reverify",
        }
    }

    /// Accepts either the stored name or the short name.
    pub fn parse(s: &str) -> Option<Self> {
        IngestJob::ALL
            .iter()
            .copied()
            .find(|job| job.as_str() == s || job.short_name() == s)
    }
}

impl fmt::Display for IngestJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for a job run or an event inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestStatus {
    Ok,
    Skip,
    Error,
    Upgraded,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Ok => "OK",
            IngestStatus::Skip => "SKIP",
            IngestStatus::Error => "ERROR",
            IngestStatus::Upgraded => "UPGRADED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Some(IngestStatus::Ok),
            "SKIP" => Some(IngestStatus::Skip),
            "ERROR" => Some(IngestStatus::Error),
            "UPGRADED" => Some(IngestStatus::Upgraded),
            _ => None,
        }
    }
}

/// Optional stream details attached to an audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_quality: Option<String>,
}

/// An audit record before it has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIngestAuditRecord {
    pub job: IngestJob,
    pub catalog_entry_id: Option<i64>,
    pub external_id: Option<i64>,
    pub status: IngestStatus,
    pub message: String,
    pub payload: JsonValue,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub metadata: Option<AuditMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAuditRecord {
    pub id: i64,
    pub job: IngestJob,
    pub catalog_entry_id: Option<i64>,
    pub external_id: Option<i64>,
    pub status: IngestStatus,
    pub message: String,
    pub payload: JsonValue,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub metadata: Option<AuditMetadata>,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_AUDIT_QUERY_LIMIT: usize = 50;
/// Most rows a single audit or history query returns over the admin API.
pub const MAX_QUERY_LIMIT: usize = 500;

/// Filters for reading the audit log. Results are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditQuery {
    pub job: Option<IngestJob>,
    pub status: Option<IngestStatus>,
    pub external_id: Option<i64>,
    pub catalog_entry_id: Option<i64>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            job: None,
            status: None,
            external_id: None,
            catalog_entry_id: None,
            limit: DEFAULT_AUDIT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

// =============================================================================
// Job runs and schedules
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

/// Persisted timing for interval jobs, so restarts don't reset the cadence.
#[derive(Debug, Clone)]
pub struct JobScheduleState {
    pub job_id: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}
