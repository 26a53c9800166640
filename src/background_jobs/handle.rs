use super::job::{BackgroundJob, JobError, JobSchedule};
use crate::server_store::{JobRun, ServerStore};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub running_count: usize,
    pub max_concurrent_runs: usize,
    pub queued: usize,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Schedule as reported by the admin API, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobScheduleInfo {
    Cron { expression: String },
    Interval { every_secs: u64 },
    Manual,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Cron(expression) => JobScheduleInfo::Cron { expression },
            JobSchedule::Interval(every) => JobScheduleInfo::Interval {
                every_secs: every.as_secs(),
            },
            JobSchedule::Manual => JobScheduleInfo::Manual,
        }
    }
}

/// One recorded run. `duration_ms` is absent while the run is in flight.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub run_id: i64,
    pub status: String,
    pub triggered_by: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        let duration_ms = run
            .finished_at
            .map(|finished| (finished - run.started_at).num_milliseconds());
        JobRunInfo {
            run_id: run.id,
            status: run.status.as_str().to_string(),
            triggered_by: run.triggered_by,
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            duration_ms,
            error_message: run.error_message,
        }
    }
}

/// A run waiting for a free slot.
#[derive(Debug, Clone)]
pub struct QueuedRun {
    pub job_id: String,
    pub params: Option<JsonValue>,
    pub triggered_by: String,
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    /// Start now, or fail with `AlreadyRunning` when the job is at capacity.
    TriggerJob {
        job_id: String,
        params: Option<JsonValue>,
        triggered_by: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
    /// Start when a slot frees up.
    EnqueueJob {
        run: QueuedRun,
        response: oneshot::Sender<Result<(), JobError>>,
    },
    /// Fired by the cron scheduler. Dropped when the job is at capacity.
    ScheduledRun { job_id: String },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    /// Static job info (set at registration, never changes)
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    /// Number of in-flight runs per job id
    pub running: HashMap<String, usize>,
    /// Runs waiting for capacity, oldest first
    pub pending: VecDeque<QueuedRun>,
}

impl SharedJobState {
    pub fn running_count(&self, job_id: &str) -> usize {
        self.running.get(job_id).copied().unwrap_or(0)
    }

    pub fn has_capacity(&self, job_id: &str) -> bool {
        match self.jobs.get(job_id) {
            Some(job) => self.running_count(job_id) < job.max_concurrent_runs().max(1),
            None => false,
        }
    }

    pub fn queued_count(&self, job_id: &str) -> usize {
        self.pending.iter().filter(|r| r.job_id == job_id).count()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.values().all(|count| *count == 0)
    }
}

/// Anything that can accept a job run for later execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job_id: &str,
        params: Option<JsonValue>,
        triggered_by: &str,
    ) -> Result<(), JobError>;
}

/// Handle to interact with the job scheduler from HTTP handlers and jobs.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// Channel to send commands to the scheduler
    command_tx: mpsc::Sender<SchedulerCommand>,
    /// Shared state for reading job info
    shared_state: Arc<RwLock<SharedJobState>>,
    /// Server store for job history queries
    server_store: Arc<dyn ServerStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            server_store,
        }
    }

    fn job_info(
        &self,
        state: &SharedJobState,
        job_id: &str,
        job: &Arc<dyn BackgroundJob>,
    ) -> Result<JobInfo> {
        let running_count = state.running_count(job_id);
        let last_run = self
            .server_store
            .get_last_run(job_id)?
            .map(JobRunInfo::from);
        let next_run_at = self
            .server_store
            .get_schedule_state(job_id)?
            .map(|s| s.next_run_at.to_rfc3339());

        Ok(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule().into(),
            is_running: running_count > 0,
            running_count,
            max_concurrent_runs: job.max_concurrent_runs().max(1),
            queued: state.queued_count(job_id),
            last_run,
            next_run_at,
        })
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let state = self.shared_state.read().await;
        let mut jobs = Vec::new();
        for (job_id, job) in &state.jobs {
            jobs.push(self.job_info(&state, job_id, job)?);
        }

        // Sort by job ID for consistent ordering
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    /// Get information about a specific job.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let state = self.shared_state.read().await;
        match state.jobs.get(job_id) {
            Some(job) => Ok(Some(self.job_info(&state, job_id, job)?)),
            None => Ok(None),
        }
    }

    /// Trigger a job manually. Fails with `AlreadyRunning` at capacity.
    pub async fn trigger_job(
        &self,
        job_id: &str,
        params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                params,
                triggered_by: "manual".to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Get job execution history.
    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunInfo>> {
        let history = self.server_store.get_job_history(job_id, limit)?;
        Ok(history.into_iter().map(JobRunInfo::from).collect())
    }

    /// Check if a job is currently running.
    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.running_count(job_id) > 0
    }

    /// Check if a job with the given ID exists.
    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }

    /// True when nothing is running or queued.
    pub async fn is_idle(&self) -> bool {
        self.shared_state.read().await.is_idle()
    }

    /// Polls until nothing is running or queued.
    pub async fn wait_until_idle(&self, poll_interval: Duration) {
        while !self.is_idle().await {
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[async_trait]
impl JobQueue for SchedulerHandle {
    async fn enqueue(
        &self,
        job_id: &str,
        params: Option<JsonValue>,
        triggered_by: &str,
    ) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::EnqueueJob {
                run: QueuedRun {
                    job_id: job_id.to_string(),
                    params,
                    triggered_by: triggered_by.to_string(),
                },
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }
}
