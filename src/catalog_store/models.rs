use crate::provider::{Codec, Delivery, Provider};
use crate::quality::{Quality, Ranked};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A title known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: i64,
    /// Identifier of record in the external catalog (numeric TMDB id).
    pub external_id: i64,
    /// Secondary identifier, e.g. an IMDb id.
    pub alt_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCatalogEntry {
    pub external_id: i64,
    pub alt_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
}

/// One playable source for a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCandidate {
    pub id: i64,
    pub catalog_entry_id: i64,
    pub provider: Provider,
    pub provider_ref: String,
    pub url: String,
    pub delivery: Delivery,
    pub quality: Quality,
    pub codec: Option<Codec>,
    pub score: f64,
    pub is_active: bool,
    pub is_broken: bool,
    pub added_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<i64>,
}

impl Ranked for StreamCandidate {
    fn quality(&self) -> Quality {
        self.quality
    }

    fn score(&self) -> f64 {
        self.score
    }
}

/// Fields written on upsert. Keyed by `(catalog_entry_id, url)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStreamCandidate {
    pub catalog_entry_id: i64,
    pub provider: Provider,
    pub provider_ref: String,
    pub url: String,
    pub delivery: Delivery,
    pub quality: Quality,
    pub codec: Option<Codec>,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateStats {
    pub total: usize,
    pub active: usize,
    pub broken: usize,
    pub entries_with_active: usize,
    /// Active candidates per quality label.
    pub active_by_quality: BTreeMap<String, usize>,
}
