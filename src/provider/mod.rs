//! Provider Adapter: one contract in front of every external stream provider.
//!
//! The adapter owns the only network-facing rate limit and retry policy in
//! the pipeline. Provider failures never propagate out of [`ProviderAdapter::get_streams`];
//! they become an empty list so one bad provider can't block the others.

mod adapter;
mod providers;
mod rate_limit;
mod retry_policy;

pub use adapter::{HttpProviderAdapter, ProviderAdapterConfig};
pub use providers::{Provider, ProviderRef, ProviderSpec};
pub use rate_limit::RateLimiter;
pub use retry_policy::RetryPolicy;

use crate::catalog_store::{CatalogEntry, NewStreamCandidate};
use crate::quality::{Quality, Ranked};
use crate::settings::PipelineSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid provider reference: {0}")]
    InvalidRef(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Provider responded with HTTP {0}")]
    Status(u16),
}

impl ProviderError {
    /// Network errors, timeouts and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout => true,
            ProviderError::Status(code) => *code >= 500,
            ProviderError::InvalidArgument(_)
            | ProviderError::InvalidRef(_)
            | ProviderError::UnknownProvider(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
    Hls,
    Dash,
    Progressive,
    LicensedEmbed,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Hls => "hls",
            Delivery::Dash => "dash",
            Delivery::Progressive => "progressive",
            Delivery::LicensedEmbed => "licensed-embed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hls" => Some(Delivery::Hls),
            "dash" => Some(Delivery::Dash),
            "progressive" => Some(Delivery::Progressive),
            "licensed-embed" => Some(Delivery::LicensedEmbed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    Hevc,
    Av1,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
            Codec::Av1 => "av1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "h264" => Some(Codec::H264),
            "hevc" => Some(Codec::Hevc),
            "av1" => Some(Codec::Av1),
            _ => None,
        }
    }
}

/// Identifiers a title can be looked up by. At least one must be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalIds {
    pub primary_id: Option<String>,
    pub secondary_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
}

impl ExternalIds {
    /// First present identifier, in primary, secondary, title order.
    pub fn lookup_key(&self) -> Option<&str> {
        [&self.primary_id, &self.secondary_id, &self.title]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

impl From<&CatalogEntry> for ExternalIds {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            primary_id: Some(entry.external_id.to_string()),
            secondary_id: entry.alt_id.clone(),
            title: Some(entry.title.clone()),
            year: entry.year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMatch {
    pub provider_ref: ProviderRef,
    pub provider: Provider,
    pub priority: u8,
}

/// A stream as a provider reported it. `quality` is the raw label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamDraft {
    pub url: String,
    pub delivery: Delivery,
    pub quality: String,
    pub codec: Option<Codec>,
    pub score: f64,
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// One match per known provider, in priority order. No network I/O.
    fn search_by_external_ids(
        &self,
        ids: &ExternalIds,
    ) -> Result<Vec<ProviderMatch>, ProviderError>;

    /// Streams listed by one provider. Any failure yields an empty list.
    async fn get_streams(&self, provider_ref: &ProviderRef) -> Vec<StreamDraft>;

    /// Liveness probe. Any failure means "not working".
    async fn verify_stream(&self, url: &str) -> bool;

    /// Picks up the rate limit and retry count from a fresh settings snapshot.
    fn apply_settings(&self, settings: &PipelineSettings);
}

/// A provider stream tagged with its normalized quality and origin.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredStream {
    pub provider: Provider,
    pub provider_ref: ProviderRef,
    pub url: String,
    pub delivery: Delivery,
    pub quality: Quality,
    pub codec: Option<Codec>,
    pub score: f64,
}

impl DiscoveredStream {
    pub fn from_draft(provider_match: &ProviderMatch, draft: StreamDraft) -> Self {
        Self {
            provider: provider_match.provider,
            provider_ref: provider_match.provider_ref.clone(),
            quality: Quality::normalize(&draft.quality),
            url: draft.url,
            delivery: draft.delivery,
            codec: draft.codec,
            score: draft.score,
        }
    }

    pub fn to_new_candidate(&self, catalog_entry_id: i64) -> NewStreamCandidate {
        NewStreamCandidate {
            catalog_entry_id,
            provider: self.provider,
            provider_ref: self.provider_ref.to_string(),
            url: self.url.clone(),
            delivery: self.delivery,
            quality: self.quality,
            codec: self.codec,
            score: self.score,
        }
    }
}

impl Ranked for DiscoveredStream {
    fn quality(&self) -> Quality {
        self.quality
    }

    fn score(&self) -> f64 {
        self.score
    }
}

impl fmt::Display for DiscoveredStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.provider, self.url, self.quality)
    }
}

/// Searches every provider for `ids` and lists their streams, in provider
/// priority order. Providers are queried one after another so the shared
/// rate limit is respected.
pub async fn gather_streams(
    adapter: &dyn ProviderAdapter,
    ids: &ExternalIds,
) -> Result<Vec<DiscoveredStream>, ProviderError> {
    let matches = adapter.search_by_external_ids(ids)?;
    let mut streams = Vec::new();
    for provider_match in &matches {
        let drafts = adapter.get_streams(&provider_match.provider_ref).await;
        streams.extend(
            drafts
                .into_iter()
                .map(|draft| DiscoveredStream::from_draft(provider_match, draft)),
        );
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Network("x".to_string()).is_retryable());
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Status(500).is_retryable());
        assert!(ProviderError::Status(502).is_retryable());
        assert!(!ProviderError::Status(404).is_retryable());
        assert!(!ProviderError::Status(429).is_retryable());
        assert!(!ProviderError::InvalidArgument("x".to_string()).is_retryable());
    }

    #[test]
    fn test_lookup_key_order() {
        let ids = ExternalIds {
            primary_id: None,
            secondary_id: Some("tt0133093".to_string()),
            title: Some("The Matrix".to_string()),
            year: Some(1999),
        };
        assert_eq!(ids.lookup_key(), Some("tt0133093"));

        let blank = ExternalIds {
            primary_id: Some("  ".to_string()),
            title: Some("Alien".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.lookup_key(), Some("Alien"));
        assert_eq!(ExternalIds::default().lookup_key(), None);
    }

    #[test]
    fn test_discovered_stream_normalizes_quality() {
        let provider_match = ProviderMatch {
            provider_ref: ProviderRef::new(Provider::AutoEmbed, "603"),
            provider: Provider::AutoEmbed,
            priority: 1,
        };
        let stream = DiscoveredStream::from_draft(
            &provider_match,
            StreamDraft {
                url: "https://p/603".to_string(),
                delivery: Delivery::Hls,
                quality: "FullHD".to_string(),
                codec: None,
                score: 85.0,
            },
        );
        assert_eq!(stream.quality, Quality::FullHd1080);

        let candidate = stream.to_new_candidate(7);
        assert_eq!(candidate.catalog_entry_id, 7);
        assert_eq!(candidate.provider_ref, "autoembed-603");
    }

    #[test]
    fn test_delivery_and_codec_labels() {
        assert_eq!(Delivery::LicensedEmbed.as_str(), "licensed-embed");
        assert_eq!(Delivery::parse("dash"), Some(Delivery::Dash));
        assert_eq!(
            serde_json::to_string(&Delivery::LicensedEmbed).unwrap(),
            "\"licensed-embed\""
        );
        assert_eq!(Codec::parse("hevc"), Some(Codec::Hevc));
        assert_eq!(Codec::parse("vp9"), None);
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn test_gather_streams_keeps_provider_order() {
        let mut adapter = MockProviderAdapter::new();
        adapter.expect_search_by_external_ids().returning(|_| {
            Ok([Provider::MultiEmbed, Provider::AutoEmbed]
                .into_iter()
                .map(|provider| ProviderMatch {
                    provider_ref: ProviderRef::new(provider, "603"),
                    provider,
                    priority: provider.priority(),
                })
                .collect())
        });
        adapter.expect_get_streams().times(2).returning(|provider_ref| {
            vec![StreamDraft {
                url: format!("https://{}/603", provider_ref.provider),
                delivery: Delivery::LicensedEmbed,
                quality: "720p".to_string(),
                codec: None,
                score: 70.0,
            }]
        });

        let ids = ExternalIds {
            primary_id: Some("603".to_string()),
            ..Default::default()
        };
        let streams = gather_streams(&adapter, &ids).await.unwrap();

        let urls: Vec<&str> = streams.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://multiembed/603", "https://autoembed/603"]);
    }
}
