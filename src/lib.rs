//! Stream ingestion pipeline library.
//!
//! This library exposes the internal modules for testing and for the
//! `stream-ingest` binary.

pub mod background_jobs;
pub mod catalog_store;
pub mod config;
pub mod discovery;
pub mod provider;
pub mod quality;
pub mod server;
pub mod server_store;
pub mod settings;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore, StreamStore};
pub use quality::Quality;
pub use server::{run_server, RequestsLoggingLevel};
pub use server_store::{ServerStore, SqliteServerStore};
