//! Background job scheduling and execution.
//!
//! Hosts the four ingestion jobs (discovery, match, refresh, reverify) plus
//! audit-log housekeeping, and the scheduler that fires them from cron
//! expressions, fixed intervals, manual triggers and the match queue.

mod audit_logger;
mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

#[cfg(test)]
mod test_support;

pub use audit_logger::{AuditEvent, IngestAuditLogger};
pub use context::JobContext;
pub use handle::{JobInfo, JobQueue, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, normalize_cron_expression, JobScheduler, DEFAULT_JOB_TIMEOUT};
