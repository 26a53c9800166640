use super::audit_logger::IngestAuditLogger;
use super::context::JobContext;
use super::handle::{QueuedRun, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
use crate::server::metrics;
use crate::server_store::{IngestJob, JobRunStatus, JobScheduleState, ServerStore};
use anyhow::Context;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler as CronScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default overall deadline for a single job run.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// How long past its own deadline a run may go before the scheduler drops it.
const DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// The cron engine wants a seconds field; crontab expressions don't have one.
pub fn normalize_cron_expression(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

struct RunningJob {
    job_id: String,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// In-flight runs keyed by run id (not shared, managed by scheduler loop)
    running_jobs: HashMap<i64, RunningJob>,

    /// Server store for persisting job history.
    server_store: Arc<dyn ServerStore>,

    /// Receiver for commands from SchedulerHandle and the cron engine
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Kept so cron callbacks can feed the command loop.
    command_sender: mpsc::Sender<SchedulerCommand>,

    /// Run ids of finished runs, sent by the run tasks.
    completion_sender: mpsc::UnboundedSender<i64>,
    completion_receiver: mpsc::UnboundedReceiver<i64>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,

    /// Overall deadline for a single run.
    job_timeout: Duration,

    cron_scheduler: Option<CronScheduler>,

    /// When false only manual and queued runs start.
    timers_enabled: bool,
}

impl JobScheduler {
    pub fn new(
        server_store: Arc<dyn ServerStore>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        command_sender: mpsc::Sender<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
        job_timeout: Duration,
    ) -> Self {
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        Self {
            shared_state,
            running_jobs: HashMap::new(),
            server_store,
            command_receiver,
            command_sender,
            completion_sender,
            completion_receiver,
            shutdown_token,
            job_context,
            job_timeout,
            cron_scheduler: None,
            timers_enabled: true,
        }
    }

    /// Turns off cron and interval firings.
    pub fn set_timers_enabled(&mut self, enabled: bool) {
        self.timers_enabled = enabled;
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        // On startup: mark any stale running jobs as failed
        match self.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

        if !self.timers_enabled {
            info!("Timed schedules disabled, only manual and queued runs will start");
        } else if let Err(e) = self.start_cron_schedules().await {
            error!("Failed to start cron schedules: {:#}", e);
        }

        loop {
            let sleep_duration = self.time_until_next_interval_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next interval job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_interval_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                Some(run_id) = self.completion_receiver.recv() => {
                    self.on_run_finished(run_id).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Hands every cron-scheduled job to the cron engine. Each firing comes
    /// back through the command channel.
    async fn start_cron_schedules(&mut self) -> anyhow::Result<()> {
        let schedules: Vec<(String, String)> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .filter_map(|(job_id, job)| match job.schedule() {
                    JobSchedule::Cron(expr) => Some((job_id.clone(), expr)),
                    _ => None,
                })
                .collect()
        };
        if schedules.is_empty() {
            return Ok(());
        }

        let cron_scheduler = CronScheduler::new()
            .await
            .context("creating cron scheduler")?;

        for (job_id, expr) in schedules {
            let cron = normalize_cron_expression(&expr);
            let sender = self.command_sender.clone();
            let fired_job_id = job_id.clone();
            let cron_job = CronJob::new_async(cron.as_str(), move |_uuid, _lock| {
                let sender = sender.clone();
                let job_id = fired_job_id.clone();
                Box::pin(async move {
                    if sender
                        .send(SchedulerCommand::ScheduledRun { job_id })
                        .await
                        .is_err()
                    {
                        debug!("Scheduler gone, dropping cron firing");
                    }
                })
            })
            .with_context(|| format!("creating cron schedule {} for {}", cron, job_id))?;
            cron_scheduler
                .add(cron_job)
                .await
                .context("adding cron schedule")?;
            info!(job_id = %job_id, cron = %cron, "Registered cron schedule");
        }

        cron_scheduler
            .start()
            .await
            .context("starting cron scheduler")?;
        self.cron_scheduler = Some(cron_scheduler);
        Ok(())
    }

    /// Handle a command from the SchedulerHandle or the cron engine.
    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob {
                job_id,
                params,
                triggered_by,
                response,
            } => {
                let result = self.trigger_job(&job_id, params, &triggered_by).await;
                let _ = response.send(result);
            }
            SchedulerCommand::EnqueueJob { run, response } => {
                let result = self.enqueue_job(run).await;
                let _ = response.send(result);
            }
            SchedulerCommand::ScheduledRun { job_id } => {
                if self.try_reserve(&job_id).await {
                    self.launch_run(&job_id, None, "cron").await;
                } else {
                    debug!("Skipping cron run of {}: at capacity", job_id);
                }
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(
        &mut self,
        job_id: &str,
        params: Option<JsonValue>,
        triggered_by: &str,
    ) -> Result<(), JobError> {
        if !self.shared_state.read().await.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if !self.try_reserve(job_id).await {
            return Err(JobError::AlreadyRunning);
        }

        self.launch_run(job_id, params, triggered_by).await;
        Ok(())
    }

    async fn enqueue_job(&mut self, run: QueuedRun) -> Result<(), JobError> {
        {
            let mut state = self.shared_state.write().await;
            if !state.jobs.contains_key(&run.job_id) {
                return Err(JobError::NotFound);
            }
            debug!("Queued run of {} (triggered_by: {})", run.job_id, run.triggered_by);
            state.pending.push_back(run);
        }
        self.start_pending_runs().await;
        Ok(())
    }

    /// Claims a run slot for `job_id`. Returns false at capacity.
    async fn try_reserve(&self, job_id: &str) -> bool {
        let mut state = self.shared_state.write().await;
        if !state.has_capacity(job_id) {
            return false;
        }
        *state.running.entry(job_id.to_string()).or_insert(0) += 1;
        true
    }

    async fn release(&self, job_id: &str) -> usize {
        let mut state = self.shared_state.write().await;
        let count = state.running.entry(job_id.to_string()).or_insert(0);
        *count = count.saturating_sub(1);
        *count
    }

    /// Starts queued runs that fit, oldest first. Runs that don't fit keep
    /// their place in the queue.
    async fn start_pending_runs(&mut self) {
        let to_launch = {
            let mut state = self.shared_state.write().await;
            let mut waiting = VecDeque::new();
            let mut to_launch = Vec::new();
            while let Some(run) = state.pending.pop_front() {
                if state.has_capacity(&run.job_id) {
                    *state.running.entry(run.job_id.clone()).or_insert(0) += 1;
                    to_launch.push(run);
                } else {
                    waiting.push_back(run);
                }
            }
            state.pending = waiting;
            to_launch
        };

        for run in to_launch {
            self.launch_run(&run.job_id, run.params, &run.triggered_by)
                .await;
        }
    }

    /// Calculate time until the next interval job should run.
    async fn time_until_next_interval_job(&self) -> Duration {
        let mut min_duration = Duration::from_secs(60); // Default check interval

        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_count(job_id) > 0 {
                continue;
            }

            if let Some(next_run) = self.get_next_run_time(job_id, &job.schedule()) {
                let now = chrono::Utc::now();
                if next_run > now {
                    let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                    if duration < min_duration {
                        min_duration = duration;
                    }
                } else {
                    // Job is due now
                    return Duration::from_secs(0);
                }
            }
        }

        min_duration
    }

    /// Next run time of an interval job. Cron and manual jobs return None.
    fn get_next_run_time(
        &self,
        job_id: &str,
        schedule: &JobSchedule,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        if !self.timers_enabled {
            return None;
        }
        match schedule {
            JobSchedule::Interval(_) => match self.server_store.get_schedule_state(job_id) {
                Ok(Some(state)) => Some(state.next_run_at),
                // No schedule state - run immediately on first interval
                Ok(None) => Some(chrono::Utc::now()),
                Err(e) => {
                    warn!("Failed to read schedule state for {}: {}", job_id, e);
                    None
                }
            },
            JobSchedule::Cron(_) | JobSchedule::Manual => None,
        }
    }

    async fn run_due_interval_jobs(&mut self) {
        let now = chrono::Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_count(job_id) > 0 {
                    continue;
                }

                if let Some(next_run) = self.get_next_run_time(job_id, &job.schedule()) {
                    if next_run <= now {
                        jobs_to_run.push(job_id.clone());
                    }
                }
            }
        }

        for job_id in jobs_to_run {
            if self.try_reserve(&job_id).await {
                self.launch_run(&job_id, None, "schedule").await;
            }
        }
    }

    /// Spawn a run task. The caller must have reserved a slot.
    async fn launch_run(&mut self, job_id: &str, params: Option<JsonValue>, triggered_by: &str) {
        let job = {
            let state = self.shared_state.read().await;
            state.jobs.get(job_id).map(Arc::clone)
        };
        let Some(job) = job else {
            error!("Attempted to spawn unknown job: {}", job_id);
            self.release(job_id).await;
            return;
        };

        // Record job start
        let run_id = match self.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                self.release(job_id).await;
                return;
            }
        };

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        // Push next_run_at forward now so the loop doesn't spin while the run is in flight
        if let JobSchedule::Interval(interval) = job.schedule() {
            self.write_schedule_state(job_id, interval, None);
        }

        let running = self.shared_state.read().await.running_count(job_id);
        metrics::set_background_job_running(job_id, running);

        let cancel_token = self.job_context.cancellation_token.child_token();
        let ctx = self
            .job_context
            .with_cancellation_token(cancel_token.clone())
            .with_deadline(self.job_timeout);

        let server_store = Arc::clone(&self.server_store);
        let shared_state = Arc::clone(&self.shared_state);
        let completion_sender = self.completion_sender.clone();
        let job_id_owned = job_id.to_string();
        let hard_deadline = self.job_timeout + DEADLINE_GRACE;

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let execution = tokio::spawn(async move {
                tokio::time::timeout(hard_deadline, async move {
                    job.execute_with_params(&ctx, params).await
                })
                .await
            });
            let result = execution.await;
            let elapsed = start_time.elapsed();

            let (status, error_msg, status_label) = match result {
                Ok(Ok(Ok(()))) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None, "success")
                }
                Ok(Ok(Err(JobError::Cancelled))) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Failed,
                        Some("Cancelled".to_string()),
                        "cancelled",
                    )
                }
                Ok(Ok(Err(JobError::Timeout))) => {
                    error!("Job {} timed out after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Failed,
                        Some(JobError::Timeout.to_string()),
                        "timeout",
                    )
                }
                Ok(Ok(Err(e))) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()), "failed")
                }
                Ok(Err(_elapsed)) => {
                    error!("Job {} was dropped after {:?}", job_id_owned, elapsed);
                    let message = JobError::Timeout.to_string();
                    record_abandoned_run(&server_store, &job_id_owned, start_time, &message);
                    (
                        JobRunStatus::Failed,
                        Some(JobError::Timeout.to_string()),
                        "timeout",
                    )
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    let message = format!("Task panic: {}", e);
                    record_abandoned_run(&server_store, &job_id_owned, start_time, &message);
                    (JobRunStatus::Failed, Some(message), "panic")
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);

            if let Err(e) = server_store.record_job_finish(run_id, status, error_msg) {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            let remaining = {
                let mut state = shared_state.write().await;
                let count = state.running.entry(job_id_owned.clone()).or_insert(0);
                *count = count.saturating_sub(1);
                *count
            };
            metrics::set_background_job_running(&job_id_owned, remaining);

            let _ = completion_sender.send(run_id);
        });

        self.running_jobs.insert(
            run_id,
            RunningJob {
                job_id: job_id.to_string(),
                handle,
                cancel_token,
            },
        );
    }

    fn write_schedule_state(
        &self,
        job_id: &str,
        interval: Duration,
        last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        let next_run_at =
            chrono::Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default();
        let state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at,
            last_run_at,
        };
        if let Err(e) = self.server_store.update_schedule_state(&state) {
            error!("Failed to update schedule state for {}: {}", job_id, e);
        }
    }

    /// Reaps a finished run, reschedules interval jobs and starts queued runs.
    async fn on_run_finished(&mut self, run_id: i64) {
        if let Some(running) = self.running_jobs.remove(&run_id) {
            let _ = running.handle.await;

            let schedule = {
                let state = self.shared_state.read().await;
                state.jobs.get(&running.job_id).map(|job| job.schedule())
            };
            if let Some(JobSchedule::Interval(interval)) = schedule {
                self.write_schedule_state(&running.job_id, interval, Some(chrono::Utc::now()));
            }
        }

        self.start_pending_runs().await;
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        if let Some(mut cron_scheduler) = self.cron_scheduler.take() {
            if let Err(e) = cron_scheduler.shutdown().await {
                warn!("Failed to stop cron scheduler: {}", e);
            }
        }

        let dropped = {
            let mut state = self.shared_state.write().await;
            std::mem::take(&mut state.pending).len()
        };
        if dropped > 0 {
            info!("Dropping {} queued runs", dropped);
        }

        let behaviors: HashMap<String, ShutdownBehavior> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .map(|(id, job)| (id.clone(), job.shutdown_behavior()))
                .collect()
        };

        // Cancel cancellable jobs
        for running in self.running_jobs.values() {
            let behavior = behaviors
                .get(&running.job_id)
                .copied()
                .unwrap_or_default();
            if behavior == ShutdownBehavior::Cancellable {
                debug!("Cancelling job: {}", running.job_id);
                running.cancel_token.cancel();
            }
        }

        // Wait for all jobs to complete
        for (_, running) in self.running_jobs.drain() {
            if behaviors.get(&running.job_id) == Some(&ShutdownBehavior::WaitForCompletion) {
                info!("Waiting for job {} to complete...", running.job_id);
            }
            let _ = tokio::time::timeout(SHUTDOWN_WAIT, running.handle).await;
        }

        info!("Scheduler shutdown complete");
    }
}

/// Ingest jobs write their own ERROR record; a run that never got to do so
/// gets one here.
fn record_abandoned_run(
    server_store: &Arc<dyn ServerStore>,
    job_id: &str,
    started_at: Instant,
    message: &str,
) {
    if let Some(job) = IngestJob::parse(job_id) {
        IngestAuditLogger::new(Arc::clone(server_store), job)
            .started_at(started_at)
            .error(message, message);
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
    job_timeout: Duration,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));

    let scheduler = JobScheduler::new(
        server_store.clone(),
        command_rx,
        command_tx.clone(),
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
        job_timeout,
    );

    let handle = SchedulerHandle::new(command_tx, shared_state, server_store);

    (scheduler, handle)
}
