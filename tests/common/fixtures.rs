//! Temporary stores wired to scripted collaborators, plus a scheduler that
//! runs against them.

use super::constants::IDLE_POLL_MS;
use super::fakes::{ScriptedDiscovery, ScriptedProvider};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use stream_ingest::background_jobs::jobs::{register_pipeline_jobs, PipelineJobsConfig};
use stream_ingest::background_jobs::{create_scheduler, JobContext, JobQueue, SchedulerHandle};
use stream_ingest::catalog_store::{CatalogEntry, CatalogStore, NewCatalogEntry, SqliteCatalogStore};
use stream_ingest::server_store::{
    AuditQuery, IngestAuditRecord, IngestJob, ServerStore, SqliteServerStore,
};
use stream_ingest::settings::{initialize_default_settings, PipelineSettings};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Isolated catalog and server databases with scripted providers.
pub struct TestPipeline {
    pub catalog: Arc<SqliteCatalogStore>,
    pub server_store: Arc<SqliteServerStore>,
    pub provider: Arc<ScriptedProvider>,
    pub discovery: Arc<ScriptedDiscovery>,
    _temp_dir: TempDir,
}

impl TestPipeline {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let catalog = SqliteCatalogStore::new(temp_dir.path().join("catalog.db"))
            .expect("Failed to open catalog store");
        let server_store = SqliteServerStore::new(temp_dir.path().join("server.db"))
            .expect("Failed to open server store");
        initialize_default_settings(&server_store).expect("Failed to seed settings");

        Self {
            catalog: Arc::new(catalog),
            server_store: Arc::new(server_store),
            provider: Arc::new(ScriptedProvider::default()),
            discovery: Arc::new(ScriptedDiscovery::with_key()),
            _temp_dir: temp_dir,
        }
    }

    pub fn context(&self, token: CancellationToken) -> JobContext {
        JobContext::new(
            token,
            self.catalog.clone(),
            self.catalog.clone(),
            self.server_store.clone(),
            self.provider.clone(),
            self.discovery.clone(),
        )
    }

    pub fn add_entry(&self, external_id: i64, title: &str) -> CatalogEntry {
        self.catalog
            .upsert_entry(&NewCatalogEntry {
                external_id,
                alt_id: None,
                title: title.to_string(),
                year: Some(1999),
            })
            .expect("Failed to add catalog entry")
    }

    /// Audit records of `job`, newest first.
    pub fn audit_of(&self, job: IngestJob) -> Vec<IngestAuditRecord> {
        self.server_store
            .query_ingest_audit(&AuditQuery {
                job: Some(job),
                ..Default::default()
            })
            .expect("Failed to query audit log")
    }

    /// Starts a scheduler with every pipeline job registered and timed
    /// schedules off.
    pub async fn start_scheduler(&self) -> RunningScheduler {
        self.start_scheduler_with_timeout(Duration::from_secs(30)).await
    }

    /// Same as `start_scheduler`, with runs cut off after `job_timeout`.
    pub async fn start_scheduler_with_timeout(&self, job_timeout: Duration) -> RunningScheduler {
        let token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(
            self.server_store.clone(),
            token.clone(),
            self.context(token.child_token()),
            job_timeout,
        );
        scheduler.set_timers_enabled(false);
        let settings =
            PipelineSettings::load(self.server_store.as_ref()).expect("Failed to load settings");
        register_pipeline_jobs(
            &mut scheduler,
            Arc::new(handle.clone()) as Arc<dyn JobQueue>,
            &settings,
            &PipelineJobsConfig::default(),
        )
        .await;

        let task = tokio::spawn(async move { scheduler.run().await });
        RunningScheduler {
            handle,
            token,
            task: Some(task),
        }
    }
}

/// A scheduler loop running in the background. Cancelled on drop.
pub struct RunningScheduler {
    pub handle: SchedulerHandle,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RunningScheduler {
    /// Triggers `job_id` and waits until it and anything it queued finished.
    pub async fn run_to_idle(&self, job_id: &str, params: Option<JsonValue>) {
        self.handle
            .trigger_job(job_id, params)
            .await
            .expect("Failed to trigger job");
        self.wait_idle().await;
    }

    pub async fn wait_idle(&self) {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.handle
                .wait_until_idle(Duration::from_millis(IDLE_POLL_MS)),
        )
        .await
        .expect("Scheduler did not become idle");
    }

    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.await.expect("Scheduler task panicked");
        }
    }
}

impl Drop for RunningScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
