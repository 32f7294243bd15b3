//! Sandbox routes mutating the in-memory backend.

use attrsync_engine::{AttributeId, LocalId, RemoteId};
use axum::{
    extract::{Path, State},
    routing::put,
    Json, Router,
};

use crate::error::Result;
use crate::handlers::{
    handle_set_local, handle_set_remote, SetLocalRequest, SetRemoteRequest, SetResponse,
};
use crate::AppState;

/// Create sandbox routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sandbox/remote/{id}/{attribute}", put(set_remote_handler))
        .route("/sandbox/local/{id}/{group}", put(set_local_handler))
}

/// PUT /sandbox/remote/{id}/{attribute} - Grant or revoke a remote attribute.
async fn set_remote_handler(
    State(state): State<AppState>,
    Path((id, attribute)): Path<(RemoteId, AttributeId)>,
    Json(request): Json<SetRemoteRequest>,
) -> Json<SetResponse> {
    Json(handle_set_remote(&state.backend, id, attribute, request))
}

/// PUT /sandbox/local/{id}/{group} - Add or remove a local group.
async fn set_local_handler(
    State(state): State<AppState>,
    Path((id, group)): Path<(LocalId, String)>,
    Json(request): Json<SetLocalRequest>,
) -> Result<Json<SetResponse>> {
    let response = handle_set_local(&state.backend, id, &group, request)?;
    Ok(Json(response))
}
