//! Ingest administration routes.
//!
//! Provides endpoints for:
//! - Pipeline status and job run history
//! - Queueing job runs
//! - Reading the ingest audit log
//! - Reading and changing pipeline settings

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use super::metrics;
use super::state::ServerState;
use crate::background_jobs::jobs::MatchRequest;
use crate::background_jobs::{JobError, JobInfo, JobQueue, JobRunInfo};
use crate::catalog_store::CandidateStats;
use crate::server_store::{
    AuditQuery, IngestAuditRecord, IngestJob, IngestStatus, PipelineSetting,
    DEFAULT_AUDIT_QUERY_LIMIT, MAX_QUERY_LIMIT,
};
use crate::settings::{update_setting, SettingsError};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_jobs: Option<Vec<String>>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            valid_jobs: None,
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}

#[derive(Debug, Serialize)]
pub struct IngestStatusResponse {
    pub jobs: Vec<JobInfo>,
    pub entries: usize,
    pub streams: CandidateStats,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct QueuedRunResponse {
    pub job: String,
    pub queued: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub job: Option<String>,
    pub status: Option<String>,
    pub external_id: Option<i64>,
    pub catalog_entry_id: Option<i64>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct SettingBody {
    pub value: JsonValue,
}

// =============================================================================
// Job name resolution
// =============================================================================

/// Maps a short name or stored job name to a registered scheduler job id.
async fn resolve_job_id(state: &ServerState, name: &str) -> Result<String, Response> {
    let job_id = IngestJob::parse(name)
        .map(|job| job.as_str().to_string())
        .unwrap_or_else(|| name.to_string());
    if state.scheduler_handle.job_exists(&job_id).await {
        return Ok(job_id);
    }

    let valid_jobs = match state.scheduler_handle.list_jobs().await {
        Ok(jobs) => jobs.into_iter().map(|job| job.id).collect(),
        Err(e) => {
            error!("Failed to list jobs: {:#}", e);
            Vec::new()
        }
    };
    Err((
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("Unknown job: {}", name),
            valid_jobs: Some(valid_jobs),
        }),
    )
        .into_response())
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /status - Registered jobs, catalog size and stream statistics
async fn get_status(State(state): State<ServerState>) -> Response {
    let jobs = match state.scheduler_handle.list_jobs().await {
        Ok(jobs) => jobs,
        Err(e) => {
            error!("Failed to list jobs: {:#}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list jobs");
        }
    };
    let streams = match state.stream_store.candidate_stats() {
        Ok(stats) => stats,
        Err(e) => {
            error!("Failed to read stream statistics: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read stream statistics",
            );
        }
    };
    let entries = match state.catalog_store.count_entries() {
        Ok(count) => count,
        Err(e) => {
            error!("Failed to count catalog entries: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to count catalog entries",
            );
        }
    };
    metrics::set_active_streams(streams.active);

    Json(IngestStatusResponse {
        jobs,
        entries,
        streams,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
    .into_response()
}

/// GET /jobs/{job}/history - Recent runs of one job
async fn get_job_history(
    State(state): State<ServerState>,
    Path(job): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let job_id = match resolve_job_id(&state, &job).await {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };
    let limit = query.limit.min(MAX_QUERY_LIMIT);
    match state.scheduler_handle.get_job_history(&job_id, limit) {
        Ok(history) => Json::<Vec<JobRunInfo>>(history).into_response(),
        Err(e) => {
            error!("Failed to read history of {}: {:#}", job_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read job history")
        }
    }
}

/// POST /run/{job} - Queue a run. An optional JSON body becomes the run's payload.
async fn post_run(
    State(state): State<ServerState>,
    Path(job): Path<String>,
    body: Bytes,
) -> Response {
    let job_id = match resolve_job_id(&state, &job).await {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };

    let params: Option<JsonValue> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e))
            }
        }
    };

    if job_id == IngestJob::Match.as_str() {
        if let Err(e) = MatchRequest::from_params(params.as_ref()) {
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    }

    match state.scheduler_handle.enqueue(&job_id, params, "api").await {
        Ok(()) => {
            info!("Queued run of {} via admin API", job_id);
            (
                StatusCode::ACCEPTED,
                Json(QueuedRunResponse {
                    job: job_id,
                    queued: true,
                }),
            )
                .into_response()
        }
        Err(JobError::NotFound) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => {
            warn!("Failed to queue {}: {}", job_id, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// GET /logs - Audit records, newest first
async fn get_logs(State(state): State<ServerState>, Query(query): Query<LogsQuery>) -> Response {
    let job = match query.job.as_deref() {
        Some(name) => match IngestJob::parse(name) {
            Some(job) => Some(job),
            None => {
                return error_response(StatusCode::BAD_REQUEST, format!("Unknown job: {}", name))
            }
        },
        None => None,
    };
    let status = match query.status.as_deref() {
        Some(value) => match IngestStatus::parse(value) {
            Some(status) => Some(status),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown status: {}", value),
                )
            }
        },
        None => None,
    };

    let audit_query = AuditQuery {
        job,
        status,
        external_id: query.external_id,
        catalog_entry_id: query.catalog_entry_id,
        limit: query
            .limit
            .unwrap_or(DEFAULT_AUDIT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT),
        offset: query.offset,
    };
    match state.server_store.query_ingest_audit(&audit_query) {
        Ok(records) => Json::<Vec<IngestAuditRecord>>(records).into_response(),
        Err(e) => {
            error!("Failed to query audit log: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to query audit log")
        }
    }
}

/// GET /settings - Every stored setting with its description
async fn get_settings(State(state): State<ServerState>) -> Response {
    match state.server_store.list_settings() {
        Ok(settings) => Json::<Vec<PipelineSetting>>(settings).into_response(),
        Err(e) => {
            error!("Failed to list settings: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list settings")
        }
    }
}

/// PUT /settings/{key} - Validate and store one setting
async fn put_setting(
    State(state): State<ServerState>,
    Path(key): Path<String>,
    Json(body): Json<SettingBody>,
) -> Response {
    match update_setting(state.server_store.as_ref(), &key, &body.value) {
        Ok(_) => match state.server_store.get_setting(&key) {
            Ok(Some(setting)) => Json(setting).into_response(),
            Ok(None) => error_response(StatusCode::NOT_FOUND, "Setting not found"),
            Err(e) => {
                error!("Failed to read setting {}: {:#}", key, e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read setting")
            }
        },
        Err(e) => match e.downcast_ref::<SettingsError>() {
            Some(settings_error) => {
                error_response(StatusCode::BAD_REQUEST, settings_error.to_string())
            }
            None => {
                error!("Failed to store setting {}: {:#}", key, e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store setting")
            }
        },
    }
}

// =============================================================================
// Router
// =============================================================================

pub fn make_ingest_routes(state: ServerState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/jobs/{job}/history", get(get_job_history))
        .route("/run/{job}", post(post_run))
        .route("/logs", get(get_logs))
        .route("/settings", get(get_settings))
        .route("/settings/{key}", put(put_setting))
        .with_state(state)
}
