use super::models::{CandidateStats, NewStreamCandidate, StreamCandidate};
use super::sqlite_catalog_store::{format_datetime, parse_datetime, SqliteCatalogStore};
use super::StreamStore;
use crate::provider::{Codec, Delivery, Provider};
use crate::quality::Quality;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

const CANDIDATE_COLUMNS: &str = "id, catalog_entry_id, provider, provider_ref, url, delivery, \
     quality, codec, score, is_active, is_broken, added_at, last_checked_at, last_verified_at, \
     superseded_by";

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<StreamCandidate> {
    let provider_str: String = row.get("provider")?;
    let delivery_str: String = row.get("delivery")?;
    let quality_str: String = row.get("quality")?;
    let codec_str: Option<String> = row.get("codec")?;
    let added_at: String = row.get("added_at")?;
    let last_checked_at: Option<String> = row.get("last_checked_at")?;
    let last_verified_at: Option<String> = row.get("last_verified_at")?;

    Ok(StreamCandidate {
        id: row.get("id")?,
        catalog_entry_id: row.get("catalog_entry_id")?,
        provider: Provider::parse(&provider_str)
            .ok_or_else(|| conversion_error(2, format!("unknown provider '{}'", provider_str)))?,
        provider_ref: row.get("provider_ref")?,
        url: row.get("url")?,
        delivery: Delivery::parse(&delivery_str)
            .ok_or_else(|| conversion_error(5, format!("unknown delivery '{}'", delivery_str)))?,
        // Stored values are canonical; anything else goes through the lenient mapping.
        quality: Quality::parse(&quality_str).unwrap_or_else(|| Quality::normalize(&quality_str)),
        codec: codec_str.as_deref().and_then(Codec::parse),
        score: row.get("score")?,
        is_active: row.get("is_active")?,
        is_broken: row.get("is_broken")?,
        added_at: parse_datetime(&added_at).unwrap_or_else(Utc::now),
        last_checked_at: last_checked_at.as_deref().and_then(parse_datetime),
        last_verified_at: last_verified_at.as_deref().and_then(parse_datetime),
        superseded_by: row.get("superseded_by")?,
    })
}

impl SqliteCatalogStore {
    fn query_candidates(
        &self,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StreamCandidate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stream_candidates WHERE {}",
            CANDIDATE_COLUMNS, where_clause
        ))?;
        let candidates = stmt
            .query_map(params, row_to_candidate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }
}

impl StreamStore for SqliteCatalogStore {
    fn upsert_candidate(&self, candidate: &NewStreamCandidate) -> Result<StreamCandidate> {
        let conn = self.conn.lock().unwrap();
        let now = format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO stream_candidates
             (catalog_entry_id, provider, provider_ref, url, delivery, quality, codec, score,
              added_at, last_checked_at, last_verified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9)
             ON CONFLICT(catalog_entry_id, url) DO UPDATE SET
                provider = ?2, provider_ref = ?3, delivery = ?5, quality = ?6, codec = ?7,
                score = ?8, last_checked_at = ?9",
            params![
                candidate.catalog_entry_id,
                candidate.provider.as_str(),
                candidate.provider_ref,
                candidate.url,
                candidate.delivery.as_str(),
                candidate.quality.as_str(),
                candidate.codec.map(|c| c.as_str()),
                candidate.score,
                now,
            ],
        )
        .with_context(|| {
            format!(
                "Failed to upsert stream candidate {} for entry {}",
                candidate.url, candidate.catalog_entry_id
            )
        })?;

        let stored = conn.query_row(
            &format!(
                "SELECT {} FROM stream_candidates WHERE catalog_entry_id = ?1 AND url = ?2",
                CANDIDATE_COLUMNS
            ),
            params![candidate.catalog_entry_id, candidate.url],
            row_to_candidate,
        )?;
        Ok(stored)
    }

    fn get_candidate(&self, id: i64) -> Result<Option<StreamCandidate>> {
        let conn = self.conn.lock().unwrap();
        let candidate = conn
            .query_row(
                &format!(
                    "SELECT {} FROM stream_candidates WHERE id = ?1",
                    CANDIDATE_COLUMNS
                ),
                params![id],
                row_to_candidate,
            )
            .optional()?;
        Ok(candidate)
    }

    fn get_active_candidate(&self, catalog_entry_id: i64) -> Result<Option<StreamCandidate>> {
        let candidates = self.query_candidates(
            "catalog_entry_id = ?1 AND is_active = 1 ORDER BY last_checked_at DESC, id DESC LIMIT 1",
            params![catalog_entry_id],
        )?;
        Ok(candidates.into_iter().next())
    }

    fn list_candidates(&self, catalog_entry_id: i64) -> Result<Vec<StreamCandidate>> {
        self.query_candidates(
            "catalog_entry_id = ?1 ORDER BY added_at, id",
            params![catalog_entry_id],
        )
    }

    fn activate_candidate(&self, catalog_entry_id: i64, candidate_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let owner: Option<i64> = tx
            .query_row(
                "SELECT catalog_entry_id FROM stream_candidates WHERE id = ?1",
                params![candidate_id],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            Some(owner) if owner == catalog_entry_id => {}
            Some(owner) => bail!(
                "Stream candidate {} belongs to entry {}, not {}",
                candidate_id,
                owner,
                catalog_entry_id
            ),
            None => bail!("Stream candidate {} not found", candidate_id),
        }

        let previous: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM stream_candidates
                 WHERE catalog_entry_id = ?1 AND is_active = 1 AND id != ?2",
            )?;
            let ids = stmt
                .query_map(params![catalog_entry_id, candidate_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        tx.execute(
            "UPDATE stream_candidates SET is_active = 0, superseded_by = ?2
             WHERE catalog_entry_id = ?1 AND is_active = 1 AND id != ?2",
            params![catalog_entry_id, candidate_id],
        )?;
        tx.execute(
            "UPDATE stream_candidates SET is_active = 1, last_checked_at = ?2
             WHERE id = ?1",
            params![candidate_id, format_datetime(&Utc::now())],
        )?;
        tx.commit()?;

        Ok(previous)
    }

    fn set_superseded_by(&self, candidate_id: i64, superseded_by: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE stream_candidates SET superseded_by = ?2 WHERE id = ?1",
            params![candidate_id, superseded_by],
        )?;
        Ok(())
    }

    fn list_active_below(&self, target: Quality) -> Result<Vec<StreamCandidate>> {
        let active = self.query_candidates("is_active = 1 ORDER BY id", params![])?;
        Ok(active
            .into_iter()
            .filter(|c| c.quality.rank() < target.rank())
            .collect())
    }

    fn list_active_unverified_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<StreamCandidate>> {
        self.query_candidates(
            "is_active = 1 AND (last_verified_at IS NULL OR last_verified_at < ?1) ORDER BY id",
            params![format_datetime(&cutoff)],
        )
    }

    fn mark_verified(&self, candidate_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let at = format_datetime(&at);
        conn.execute(
            "UPDATE stream_candidates SET last_verified_at = ?2, last_checked_at = ?2, is_broken = 0
             WHERE id = ?1",
            params![candidate_id, at],
        )?;
        Ok(())
    }

    fn mark_broken(&self, candidate_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let at = format_datetime(&at);
        conn.execute(
            "UPDATE stream_candidates
             SET is_active = 0, is_broken = 1, last_verified_at = ?2, last_checked_at = ?2
             WHERE id = ?1",
            params![candidate_id, at],
        )?;
        Ok(())
    }

    fn delete_broken_verified_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM stream_candidates
             WHERE is_broken = 1 AND is_active = 0 AND last_verified_at < ?1",
            params![format_datetime(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn candidate_stats(&self) -> Result<CandidateStats> {
        let conn = self.conn.lock().unwrap();
        let (total, active, broken, entries_with_active): (i64, i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_active), 0),
                    COALESCE(SUM(is_broken), 0),
                    COUNT(DISTINCT CASE WHEN is_active = 1 THEN catalog_entry_id END)
             FROM stream_candidates",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT quality, COUNT(*) FROM stream_candidates WHERE is_active = 1 GROUP BY quality",
        )?;
        let active_by_quality: BTreeMap<String, usize> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(CandidateStats {
            total: total as usize,
            active: active as usize,
            broken: broken as usize,
            entries_with_active: entries_with_active as usize,
            active_by_quality,
        })
    }
}
