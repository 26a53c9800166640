use super::{
    Provider, ProviderAdapter, ProviderError, ProviderMatch, ProviderRef, RateLimiter,
    RetryPolicy, StreamDraft,
};
use super::ExternalIds;
use crate::server::metrics;
use crate::settings::PipelineSettings;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("stream-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ProviderAdapterConfig {
    pub request_timeout: Duration,
    pub verify_timeout: Duration,
    /// `max_retries` here is only the starting value; settings override it per run.
    pub retry: RetryPolicy,
    pub initial_rate_limit_rps: f64,
    /// Base URL overrides; providers not listed use their default.
    pub base_urls: HashMap<Provider, String>,
}

impl Default for ProviderAdapterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            verify_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            initial_rate_limit_rps: 3.0,
            base_urls: HashMap::new(),
        }
    }
}

/// Result of one provider request after retries, before it is collapsed to a list.
enum ProviderOutcome {
    Streams(Vec<StreamDraft>),
    Failed { reason: ProviderError, attempts: u32 },
}

/// Provider adapter that talks to the embed providers over HTTP.
///
/// Long-lived: it owns the process-wide rate limiter. Per-run settings are
/// pushed in through [`ProviderAdapter::apply_settings`].
pub struct HttpProviderAdapter {
    client: Client,
    config: ProviderAdapterConfig,
    rate_limiter: RateLimiter,
    max_retries: AtomicU32,
}

impl HttpProviderAdapter {
    pub fn new(config: ProviderAdapterConfig) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            rate_limiter: RateLimiter::new(config.initial_rate_limit_rps),
            max_retries: AtomicU32::new(config.retry.max_retries),
            config,
        })
    }

    fn base_url(&self, provider: Provider) -> &str {
        self.config
            .base_urls
            .get(&provider)
            .map(String::as_str)
            .unwrap_or(provider.spec().default_base_url)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.load(Ordering::Relaxed),
            ..self.config.retry.clone()
        }
    }

    /// HEAD request; 4xx and 5xx become `Status` errors.
    async fn probe(&self, url: &str, timeout: Duration) -> Result<(), ProviderError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn fetch_streams(&self, provider_ref: &ProviderRef) -> ProviderOutcome {
        let provider = provider_ref.provider;
        let spec = provider.spec();
        let url = provider.stream_url(self.base_url(provider), &provider_ref.key);
        let policy = self.retry_policy();

        let mut retry_count = 0;
        loop {
            self.rate_limiter.acquire().await;
            match self.probe(&url, self.config.request_timeout).await {
                Ok(()) => {
                    return ProviderOutcome::Streams(vec![StreamDraft {
                        url,
                        delivery: spec.delivery,
                        quality: spec.quality.to_string(),
                        codec: Some(spec.codec),
                        score: spec.score,
                    }]);
                }
                Err(e) if policy.should_retry(&e, retry_count) => {
                    let backoff = policy.backoff_with_jitter(retry_count);
                    debug!(
                        provider = %provider,
                        attempt = retry_count + 1,
                        "Provider request failed ({}), retrying in {:?}",
                        e,
                        backoff
                    );
                    metrics::record_provider_retry(provider.as_str());
                    tokio::time::sleep(backoff).await;
                    retry_count += 1;
                }
                Err(e) => {
                    return ProviderOutcome::Failed {
                        reason: e,
                        attempts: retry_count + 1,
                    };
                }
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn search_by_external_ids(
        &self,
        ids: &ExternalIds,
    ) -> Result<Vec<ProviderMatch>, ProviderError> {
        let key = ids.lookup_key().ok_or_else(|| {
            ProviderError::InvalidArgument(
                "At least one of primary id, secondary id, or title is required".to_string(),
            )
        })?;
        let key = urlencoding::encode(key).into_owned();

        Ok(Provider::ALL
            .iter()
            .map(|provider| ProviderMatch {
                provider_ref: ProviderRef::new(*provider, key.clone()),
                provider: *provider,
                priority: provider.priority(),
            })
            .collect())
    }

    async fn get_streams(&self, provider_ref: &ProviderRef) -> Vec<StreamDraft> {
        let provider = provider_ref.provider.as_str();
        match self.fetch_streams(provider_ref).await {
            ProviderOutcome::Streams(streams) => {
                metrics::record_provider_request(provider, "ok");
                streams
            }
            ProviderOutcome::Failed { reason, attempts } => {
                warn!(
                    provider = provider,
                    provider_ref = %provider_ref,
                    attempts = attempts,
                    "Error fetching streams: {}",
                    reason
                );
                metrics::record_provider_request(provider, "failed");
                Vec::new()
            }
        }
    }

    async fn verify_stream(&self, url: &str) -> bool {
        self.rate_limiter.acquire().await;
        let working = match self.probe(url, self.config.verify_timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!(url = url, "Stream verification failed: {}", e);
                false
            }
        };
        metrics::record_verification(if working { "working" } else { "broken" });
        working
    }

    fn apply_settings(&self, settings: &PipelineSettings) {
        self.rate_limiter.set_rate(settings.rate_limit_rps);
        self.max_retries
            .store(settings.max_retry_attempts, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> HttpProviderAdapter {
        HttpProviderAdapter::new(ProviderAdapterConfig::default()).unwrap()
    }

    #[test]
    fn test_search_requires_an_identifier() {
        let err = adapter()
            .search_by_external_ids(&ExternalIds {
                year: Some(1999),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument(_)));
    }

    #[test]
    fn test_search_fans_out_in_priority_order() {
        let matches = adapter()
            .search_by_external_ids(&ExternalIds {
                primary_id: Some("603".to_string()),
                title: Some("The Matrix".to_string()),
                ..Default::default()
            })
            .unwrap();

        let refs: Vec<String> = matches.iter().map(|m| m.provider_ref.to_string()).collect();
        assert_eq!(
            refs,
            vec!["autoembed-603", "2embed-603", "multiembed-603", "embedsu-603"]
        );
        assert!(matches.windows(2).all(|w| w[0].priority < w[1].priority));
    }

    #[test]
    fn test_search_encodes_title_keys() {
        let matches = adapter()
            .search_by_external_ids(&ExternalIds {
                title: Some("The Matrix".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(matches[0].provider_ref.key, "The%20Matrix");
    }

    #[test]
    fn test_base_url_override() {
        let mut config = ProviderAdapterConfig::default();
        config
            .base_urls
            .insert(Provider::EmbedSu, "http://127.0.0.1:9".to_string());
        let adapter = HttpProviderAdapter::new(config).unwrap();

        assert_eq!(adapter.base_url(Provider::EmbedSu), "http://127.0.0.1:9");
        assert_eq!(adapter.base_url(Provider::AutoEmbed), "https://autoembed.co");
    }

    #[test]
    fn test_apply_settings_updates_limits() {
        let adapter = adapter();
        let settings = PipelineSettings {
            rate_limit_rps: 10.0,
            max_retry_attempts: 7,
            ..Default::default()
        };
        adapter.apply_settings(&settings);

        assert_eq!(adapter.retry_policy().max_retries, 7);
        assert_eq!(adapter.rate_limiter.interval(), Duration::from_millis(100));
    }
}
