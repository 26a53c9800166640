//! Catalog entries and the stream candidates discovered for them.

mod models;
mod schema;
mod sqlite_catalog_store;
mod sqlite_stream_store;

pub use models::*;
pub use schema::CATALOG_VERSIONED_SCHEMAS;
pub use sqlite_catalog_store::SqliteCatalogStore;

use crate::quality::Quality;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Titles known to the platform. The pipeline only reads from it.
pub trait CatalogStore: Send + Sync {
    fn get_entry(&self, id: i64) -> Result<Option<CatalogEntry>>;
    fn get_entry_by_external_id(&self, external_id: i64) -> Result<Option<CatalogEntry>>;
    /// Subset of `external_ids` that already have an entry.
    fn find_existing_external_ids(&self, external_ids: &[i64]) -> Result<HashSet<i64>>;
    /// Inserts or updates by `external_id`.
    fn upsert_entry(&self, entry: &NewCatalogEntry) -> Result<CatalogEntry>;
    fn list_entries(&self, limit: usize, offset: usize) -> Result<Vec<CatalogEntry>>;
    fn count_entries(&self) -> Result<usize>;
}

/// Stream candidates and the active-stream protocol.
pub trait StreamStore: Send + Sync {
    /// Inserts a new candidate or updates provider fields of the existing
    /// `(catalog_entry_id, url)` row. Activity flags are left untouched.
    fn upsert_candidate(&self, candidate: &NewStreamCandidate) -> Result<StreamCandidate>;
    fn get_candidate(&self, id: i64) -> Result<Option<StreamCandidate>>;
    fn get_active_candidate(&self, catalog_entry_id: i64) -> Result<Option<StreamCandidate>>;
    fn list_candidates(&self, catalog_entry_id: i64) -> Result<Vec<StreamCandidate>>;

    /// Makes `candidate_id` the only active candidate of its entry, in one
    /// transaction. Previously active rows get `superseded_by = candidate_id`.
    /// Returns the ids that were deactivated.
    fn activate_candidate(&self, catalog_entry_id: i64, candidate_id: i64) -> Result<Vec<i64>>;
    fn set_superseded_by(&self, candidate_id: i64, superseded_by: i64) -> Result<()>;

    /// Active candidates ranked strictly below `target`.
    fn list_active_below(&self, target: Quality) -> Result<Vec<StreamCandidate>>;
    /// Active candidates never verified or last verified before `cutoff`.
    fn list_active_unverified_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<StreamCandidate>>;

    fn mark_verified(&self, candidate_id: i64, at: DateTime<Utc>) -> Result<()>;
    /// Deactivates and flags the candidate as broken.
    fn mark_broken(&self, candidate_id: i64, at: DateTime<Utc>) -> Result<()>;
    /// Deletes inactive broken candidates last verified before `cutoff`.
    fn delete_broken_verified_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn candidate_stats(&self) -> Result<CandidateStats>;
}
