//! SQLite schema for the catalog database: catalog entries and their stream candidates.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const CATALOG_ENTRIES_TABLE_V1: Table = Table {
    name: "catalog_entries",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("external_id", &SqlType::Integer, non_null = true),
        sqlite_column!("alt_id", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("year", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_catalog_entries_alt_id", "alt_id")],
    unique_constraints: &[&["external_id"]],
};

const ENTRY_FOREIGN_KEY: ForeignKey = ForeignKey {
    foreign_table: "catalog_entries",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const SUPERSEDED_BY_FOREIGN_KEY: ForeignKey = ForeignKey {
    foreign_table: "stream_candidates",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::SetNull,
};

/// At most one active row per entry is maintained by `activate_candidate`,
/// not by a constraint.
const STREAM_CANDIDATES_TABLE_V1: Table = Table {
    name: "stream_candidates",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "catalog_entry_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ENTRY_FOREIGN_KEY)
        ),
        sqlite_column!("provider", &SqlType::Text, non_null = true),
        sqlite_column!("provider_ref", &SqlType::Text, non_null = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!("delivery", &SqlType::Text, non_null = true),
        sqlite_column!("quality", &SqlType::Text, non_null = true),
        sqlite_column!("codec", &SqlType::Text),
        sqlite_column!("score", &SqlType::Real, non_null = true),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_broken",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("added_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_checked_at", &SqlType::Text),
        sqlite_column!("last_verified_at", &SqlType::Text),
        sqlite_column!(
            "superseded_by",
            &SqlType::Integer,
            foreign_key = Some(&SUPERSEDED_BY_FOREIGN_KEY)
        ),
    ],
    indices: &[
        ("idx_stream_candidates_entry_active", "catalog_entry_id, is_active"),
        ("idx_stream_candidates_active_verified", "is_active, last_verified_at"),
        ("idx_stream_candidates_broken", "is_broken, last_verified_at"),
    ],
    unique_constraints: &[&["catalog_entry_id", "url"]],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[CATALOG_ENTRIES_TABLE_V1, STREAM_CANDIDATES_TABLE_V1],
    migration: None,
}];
