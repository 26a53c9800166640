//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestPipeline, MATRIX_EXTERNAL_ID};
//!
//! #[tokio::test]
//! async fn test_match() {
//!     let pipeline = TestPipeline::new();
//!     let entry = pipeline.add_entry(MATRIX_EXTERNAL_ID, "The Matrix");
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fakes;
mod fixtures;
mod provider_server;
mod server;

pub use constants::*;
pub use fakes::{draft, RecordingQueue, ScriptedDiscovery, ScriptedProvider};
pub use fixtures::{RunningScheduler, TestPipeline};
pub use provider_server::FakeProviderServer;
pub use server::TestServer;
