use super::context::JobContext;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

/// Schedule for when a job should run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSchedule {
    /// Run at specific times using 5 or 6 field cron syntax
    Cron(String),
    /// Run at fixed intervals
    Interval(Duration),
    /// Run only when triggered or enqueued
    Manual,
}

/// How a job should be handled during server shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,

    #[error("Job is already running")]
    AlreadyRunning,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job timed out")]
    Timeout,
}

/// Trait for background jobs.
///
/// Jobs are async and run on the tokio runtime. Long-running work should
/// check `ctx.is_cancelled()` between items and return `JobError::Cancelled`.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// How many runs of this job may execute at the same time.
    fn max_concurrent_runs(&self) -> usize {
        1
    }

    /// Execute the job.
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Execute the job with optional parameters.
    ///
    /// Called for manual triggers and queued runs that carry a JSON payload.
    /// The default implementation ignores the parameters and delegates to
    /// `execute()`.
    async fn execute_with_params(
        &self,
        ctx: &JobContext,
        _params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        self.execute(ctx).await
    }
}
