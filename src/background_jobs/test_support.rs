//! Fixtures shared by the scheduler and job unit tests.

use super::context::JobContext;
use super::handle::JobQueue;
use super::job::JobError;
use crate::catalog_store::{CatalogEntry, CatalogStore, NewCatalogEntry, SqliteCatalogStore};
use crate::discovery::{CatalogDiscovery, DiscoveryError, DiscoveryFacet};
use crate::provider::{
    Delivery, ExternalIds, Provider, ProviderAdapter, ProviderError, ProviderMatch, ProviderRef,
    StreamDraft,
};
use crate::server_store::{ServerStore, SqliteServerStore};
use crate::settings::PipelineSettings;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Provider adapter with canned streams per provider and canned liveness.
#[derive(Default)]
pub struct ScriptedProvider {
    streams: Mutex<HashMap<Provider, Vec<StreamDraft>>>,
    broken_urls: Mutex<HashSet<String>>,
    pub applied_settings: Mutex<Option<PipelineSettings>>,
}

impl ScriptedProvider {
    pub fn set_streams(&self, provider: Provider, drafts: Vec<StreamDraft>) {
        self.streams.lock().unwrap().insert(provider, drafts);
    }

    pub fn mark_broken(&self, url: &str) {
        self.broken_urls.lock().unwrap().insert(url.to_string());
    }
}

pub fn draft(url: &str, quality: &str, score: f64) -> StreamDraft {
    StreamDraft {
        url: url.to_string(),
        delivery: Delivery::LicensedEmbed,
        quality: quality.to_string(),
        codec: None,
        score,
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn search_by_external_ids(
        &self,
        ids: &ExternalIds,
    ) -> Result<Vec<ProviderMatch>, ProviderError> {
        let key = ids.lookup_key().ok_or_else(|| {
            ProviderError::InvalidArgument("no identifiers".to_string())
        })?;
        Ok(Provider::ALL
            .iter()
            .map(|provider| ProviderMatch {
                provider_ref: ProviderRef::new(*provider, key),
                provider: *provider,
                priority: provider.priority(),
            })
            .collect())
    }

    async fn get_streams(&self, provider_ref: &ProviderRef) -> Vec<StreamDraft> {
        self.streams
            .lock()
            .unwrap()
            .get(&provider_ref.provider)
            .cloned()
            .unwrap_or_default()
    }

    async fn verify_stream(&self, url: &str) -> bool {
        !self.broken_urls.lock().unwrap().contains(url)
    }

    fn apply_settings(&self, settings: &PipelineSettings) {
        *self.applied_settings.lock().unwrap() = Some(settings.clone());
    }
}

/// Discovery source with canned ids per facet. A facet without ids fails.
#[derive(Default)]
pub struct ScriptedDiscovery {
    pub has_key: bool,
    pub facets: Mutex<HashMap<DiscoveryFacet, Vec<i64>>>,
}

#[async_trait]
impl CatalogDiscovery for ScriptedDiscovery {
    fn has_credentials(&self) -> bool {
        self.has_key
    }

    async fn discover(&self, facet: DiscoveryFacet) -> Result<Vec<i64>, DiscoveryError> {
        self.facets
            .lock()
            .unwrap()
            .get(&facet)
            .cloned()
            .ok_or(DiscoveryError::Status(503))
    }
}

/// Queue that only remembers what it was given.
#[derive(Default)]
pub struct RecordingQueue {
    pub runs: Mutex<Vec<(String, Option<JsonValue>)>>,
    pub fail_for: Mutex<HashSet<i64>>,
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(
        &self,
        job_id: &str,
        params: Option<JsonValue>,
        _triggered_by: &str,
    ) -> Result<(), JobError> {
        let external_id = params
            .as_ref()
            .and_then(|p| p.get("externalId"))
            .and_then(|v| v.as_i64());
        if let Some(id) = external_id {
            if self.fail_for.lock().unwrap().contains(&id) {
                return Err(JobError::ExecutionFailed("queue full".to_string()));
            }
        }
        self.runs
            .lock()
            .unwrap()
            .push((job_id.to_string(), params));
        Ok(())
    }
}

pub struct TestHarness {
    pub catalog: Arc<SqliteCatalogStore>,
    pub server_store: Arc<dyn ServerStore>,
    pub provider: Arc<ScriptedProvider>,
    pub discovery: Arc<ScriptedDiscovery>,
    _temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let catalog = SqliteCatalogStore::new(temp_dir.path().join("catalog.db")).unwrap();
        let server_store = SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap();
        Self {
            catalog: Arc::new(catalog),
            server_store: Arc::new(server_store),
            provider: Arc::new(ScriptedProvider::default()),
            discovery: Arc::new(ScriptedDiscovery {
                has_key: true,
                ..Default::default()
            }),
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
            .unwrap()
    }
}
