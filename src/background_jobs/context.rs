use super::job::JobError;
use crate::catalog_store::{CatalogStore, StreamStore};
use crate::discovery::CatalogDiscovery;
use crate::provider::ProviderAdapter;
use crate::server_store::ServerStore;
use crate::settings::PipelineSettings;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Catalog entries.
    pub catalog_store: Arc<dyn CatalogStore>,

    /// Stream candidates and the active-stream protocol.
    pub stream_store: Arc<dyn StreamStore>,

    /// Settings, audit log, job history.
    pub server_store: Arc<dyn ServerStore>,

    pub provider: Arc<dyn ProviderAdapter>,

    pub discovery: Arc<dyn CatalogDiscovery>,

    /// Point in time after which the run gives up with `JobError::Timeout`.
    pub deadline: Option<Instant>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        catalog_store: Arc<dyn CatalogStore>,
        stream_store: Arc<dyn StreamStore>,
        server_store: Arc<dyn ServerStore>,
        provider: Arc<dyn ProviderAdapter>,
        discovery: Arc<dyn CatalogDiscovery>,
    ) -> Self {
        Self {
            cancellation_token,
            catalog_store,
            stream_store,
            server_store,
            provider,
            discovery,
            deadline: None,
        }
    }

    /// Same resources, different cancellation token.
    pub fn with_cancellation_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    /// Same resources, with a deadline `timeout` from now.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..self.clone()
        }
    }

    /// Drives `work` until it finishes or the run deadline passes.
    pub async fn within_deadline<T, F>(&self, work: F) -> Result<T, JobError>
    where
        F: Future<Output = Result<T, JobError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, work)
                .await
                .unwrap_or(Err(JobError::Timeout)),
            None => work.await,
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Reads the settings snapshot for this run and pushes the provider
    /// related values into the adapter.
    pub fn load_settings(&self) -> Result<PipelineSettings, JobError> {
        let settings = PipelineSettings::load(self.server_store.as_ref())
            .map_err(|e| JobError::Configuration(format!("Failed to load settings: {}", e)))?;
        self.provider.apply_settings(&settings);
        Ok(settings)
    }
}
