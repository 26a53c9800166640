use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::catalog_store::{CatalogStore, StreamStore};
use crate::server_store::ServerStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type GuardedStreamStore = Arc<dyn StreamStore>;
pub type GuardedServerStore = Arc<dyn ServerStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub catalog_store: GuardedCatalogStore,
    pub stream_store: GuardedStreamStore,
    pub server_store: GuardedServerStore,
    pub scheduler_handle: SchedulerHandle,
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for GuardedStreamStore {
    fn from_ref(input: &ServerState) -> Self {
        input.stream_store.clone()
    }
}

impl FromRef<ServerState> for GuardedServerStore {
    fn from_ref(input: &ServerState) -> Self {
        input.server_store.clone()
    }
}

impl FromRef<ServerState> for SchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
