use super::models::{CatalogEntry, NewCatalogEntry};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::CatalogStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed catalog and stream candidate store (`catalog.db`).
pub struct SqliteCatalogStore {
    pub(super) conn: Arc<Mutex<Connection>>,
}

pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

const ENTRY_COLUMNS: &str = "id, external_id, alt_id, title, year, created_at";

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CatalogEntry> {
        let created_at: String = row.get("created_at")?;
        Ok(CatalogEntry {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            alt_id: row.get("alt_id")?,
            title: row.get("title")?,
            year: row.get("year")?,
            created_at: parse_datetime(&created_at).unwrap_or_else(Utc::now),
        })
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn get_entry(&self, id: i64) -> Result<Option<CatalogEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM catalog_entries WHERE id = ?1", ENTRY_COLUMNS),
                params![id],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn get_entry_by_external_id(&self, external_id: i64) -> Result<Option<CatalogEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM catalog_entries WHERE external_id = ?1",
                    ENTRY_COLUMNS
                ),
                params![external_id],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_existing_external_ids(&self, external_ids: &[i64]) -> Result<HashSet<i64>> {
        let mut existing = HashSet::new();
        if external_ids.is_empty() {
            return Ok(existing);
        }

        let conn = self.conn.lock().unwrap();
        // SQLite caps bound parameters per statement.
        for chunk in external_ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT external_id FROM catalog_entries WHERE external_id IN ({})",
                placeholders
            ))?;
            let ids = stmt
                .query_map(
                    params_from_iter(chunk.iter().map(|id| SqlValue::Integer(*id))),
                    |row| row.get::<_, i64>(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            existing.extend(ids);
        }
        Ok(existing)
    }

    fn upsert_entry(&self, entry: &NewCatalogEntry) -> Result<CatalogEntry> {
        let conn = self.conn.lock().unwrap();
        let now = format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO catalog_entries (external_id, alt_id, title, year, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(external_id) DO UPDATE SET
                alt_id = ?2, title = ?3, year = ?4, updated_at = ?5",
            params![entry.external_id, entry.alt_id, entry.title, entry.year, now],
        )
        .with_context(|| format!("Failed to upsert catalog entry {}", entry.external_id))?;

        let stored = conn.query_row(
            &format!(
                "SELECT {} FROM catalog_entries WHERE external_id = ?1",
                ENTRY_COLUMNS
            ),
            params![entry.external_id],
            Self::row_to_entry,
        )?;
        Ok(stored)
    }

    fn list_entries(&self, limit: usize, offset: usize) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM catalog_entries ORDER BY id LIMIT ?1 OFFSET ?2",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![limit as i64, offset as i64], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn count_entries(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM catalog_entries", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}
