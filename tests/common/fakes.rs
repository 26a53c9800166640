//! In-memory stand-ins for the provider adapter, the discovery source and
//! the job queue.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use stream_ingest::background_jobs::{JobError, JobQueue};
use stream_ingest::discovery::{CatalogDiscovery, DiscoveryError, DiscoveryFacet};
use stream_ingest::provider::{
    Delivery, ExternalIds, Provider, ProviderAdapter, ProviderError, ProviderMatch, ProviderRef,
    StreamDraft,
};
use stream_ingest::settings::PipelineSettings;

pub fn draft(url: &str, quality: &str, score: f64) -> StreamDraft {
    StreamDraft {
        url: url.to_string(),
        delivery: Delivery::LicensedEmbed,
        quality: quality.to_string(),
        codec: None,
        score,
    }
}

/// Provider adapter with canned streams per provider and canned liveness.
#[derive(Default)]
pub struct ScriptedProvider {
    streams: Mutex<HashMap<Provider, Vec<StreamDraft>>>,
    broken_urls: Mutex<HashSet<String>>,
    lookups: Mutex<Vec<String>>,
    stall: Mutex<Option<Duration>>,
}

impl ScriptedProvider {
    pub fn set_streams(&self, provider: Provider, drafts: Vec<StreamDraft>) {
        self.streams.lock().unwrap().insert(provider, drafts);
    }

    pub fn clear_streams(&self) {
        self.streams.lock().unwrap().clear();
    }

    pub fn mark_broken(&self, url: &str) {
        self.broken_urls.lock().unwrap().insert(url.to_string());
    }

    /// Makes every `get_streams` call take `delay` before answering.
    pub fn stall_streams(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    /// Lookup keys seen by `search_by_external_ids`, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn search_by_external_ids(
        &self,
        ids: &ExternalIds,
    ) -> Result<Vec<ProviderMatch>, ProviderError> {
        let key = ids
            .lookup_key()
            .ok_or_else(|| ProviderError::InvalidArgument("no identifiers".to_string()))?;
        self.lookups.lock().unwrap().push(key.to_string());
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
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
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

    fn apply_settings(&self, _settings: &PipelineSettings) {}
}

/// Discovery source with canned ids per facet. A facet without ids fails.
#[derive(Default)]
pub struct ScriptedDiscovery {
    pub has_key: bool,
    facets: Mutex<HashMap<DiscoveryFacet, Vec<i64>>>,
}

impl ScriptedDiscovery {
    pub fn with_key() -> Self {
        Self {
            has_key: true,
            ..Default::default()
        }
    }

    pub fn set_facet(&self, facet: DiscoveryFacet, ids: Vec<i64>) {
        self.facets.lock().unwrap().insert(facet, ids);
    }
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
    runs: Mutex<Vec<(String, Option<JsonValue>, String)>>,
}

impl RecordingQueue {
    /// `(job_id, params)` of every accepted run.
    pub fn runs(&self) -> Vec<(String, Option<JsonValue>)> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .map(|(job, params, _)| (job.clone(), params.clone()))
            .collect()
    }

    pub fn triggered_by(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, by)| by.clone())
            .collect()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(
        &self,
        job_id: &str,
        params: Option<JsonValue>,
        triggered_by: &str,
    ) -> Result<(), JobError> {
        self.runs
            .lock()
            .unwrap()
            .push((job_id.to_string(), params, triggered_by.to_string()));
        Ok(())
    }
}
