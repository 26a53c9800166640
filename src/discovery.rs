//! Client for the external catalog discovery API (TMDB-compatible).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("TMDB API key not configured")]
    MissingApiKey,

    #[error("Discovery request failed: {0}")]
    Request(String),

    #[error("Discovery API responded with HTTP {0}")]
    Status(u16),
}

/// Listings the discovery job polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryFacet {
    NowPlaying,
    Popular,
    TopRated,
    Upcoming,
}

impl DiscoveryFacet {
    pub const ALL: [DiscoveryFacet; 4] = [
        DiscoveryFacet::NowPlaying,
        DiscoveryFacet::Popular,
        DiscoveryFacet::TopRated,
        DiscoveryFacet::Upcoming,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            DiscoveryFacet::NowPlaying => "movie/now_playing",
            DiscoveryFacet::Popular => "movie/popular",
            DiscoveryFacet::TopRated => "movie/top_rated",
            DiscoveryFacet::Upcoming => "movie/upcoming",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryFacet::NowPlaying => "now_playing",
            DiscoveryFacet::Popular => "popular",
            DiscoveryFacet::TopRated => "top_rated",
            DiscoveryFacet::Upcoming => "upcoming",
        }
    }
}

impl fmt::Display for DiscoveryFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CatalogDiscovery: Send + Sync {
    /// Whether a credential is configured. Without one the discovery job
    /// fails before doing any work.
    fn has_credentials(&self) -> bool;

    /// External ids listed on the first page of `facet`.
    async fn discover(&self, facet: DiscoveryFacet) -> Result<Vec<i64>, DiscoveryError>;
}

#[derive(Deserialize)]
struct ListingResponse {
    #[serde(default)]
    results: Vec<ListingItem>,
}

#[derive(Deserialize)]
struct ListingItem {
    id: Option<i64>,
}

pub struct TmdbDiscoveryClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl TmdbDiscoveryClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout,
        })
    }
}

#[async_trait]
impl CatalogDiscovery for TmdbDiscoveryClient {
    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    async fn discover(&self, facet: DiscoveryFacet) -> Result<Vec<i64>, DiscoveryError> {
        let api_key = self.api_key.as_deref().ok_or(DiscoveryError::MissingApiKey)?;
        let url = format!("{}/{}", self.base_url, facet.path());

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", api_key), ("page", "1")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status(status.as_u16()));
        }

        let listing: ListingResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;

        Ok(listing.results.into_iter().filter_map(|item| item.id).collect())
    }
}
