//! Read-only views of the streams attached to catalog entries.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::error;

use super::state::ServerState;
use crate::catalog_store::{CatalogEntry, StreamCandidate};

fn load_entry(state: &ServerState, id: i64) -> Result<CatalogEntry, Response> {
    match state.catalog_store.get_entry(id) {
        Ok(Some(entry)) => Ok(entry),
        Ok(None) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(e) => {
            error!("Failed to load catalog entry {}: {:#}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

async fn get_active_stream(State(state): State<ServerState>, Path(id): Path<i64>) -> Response {
    let entry = match load_entry(&state, id) {
        Ok(entry) => entry,
        Err(response) => return response,
    };
    match state.stream_store.get_active_candidate(entry.id) {
        Ok(Some(candidate)) => Json(candidate).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to load active stream of {}: {:#}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_streams(State(state): State<ServerState>, Path(id): Path<i64>) -> Response {
    let entry = match load_entry(&state, id) {
        Ok(entry) => entry,
        Err(response) => return response,
    };
    match state.stream_store.list_candidates(entry.id) {
        Ok(candidates) => Json::<Vec<StreamCandidate>>(candidates).into_response(),
        Err(e) => {
            error!("Failed to list streams of {}: {:#}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn make_entry_routes(state: ServerState) -> Router {
    Router::new()
        .route("/{id}/active-stream", get(get_active_stream))
        .route("/{id}/streams", get(get_streams))
        .with_state(state)
}
