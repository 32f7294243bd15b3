//! Resync and diagnostic routes.

use attrsync_engine::{LocalId, RemoteId, Someone, SummaryReport};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::error::Result;
use crate::handlers::{handle_resync, handle_resync_all};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/resync", post(resync_all_handler))
        .route("/resync/remote/{id}", post(resync_remote_handler))
        .route("/resync/local/{id}", post(resync_local_handler))
        .route("/debug", get(debug_handler))
}

/// POST /resync - Resync every linked identity.
async fn resync_all_handler(State(state): State<AppState>) -> Result<Json<Vec<SummaryReport>>> {
    let reports = handle_resync_all(&state.engine).await?;
    Ok(Json(reports))
}

/// POST /resync/remote/{id} - Resync one identity by remote id.
async fn resync_remote_handler(
    State(state): State<AppState>,
    Path(id): Path<RemoteId>,
) -> Result<Json<SummaryReport>> {
    let report = handle_resync(&state.engine, Someone::remote(id)).await?;
    Ok(Json(report))
}

/// POST /resync/local/{id} - Resync one identity by local id.
async fn resync_local_handler(
    State(state): State<AppState>,
    Path(id): Path<LocalId>,
) -> Result<Json<SummaryReport>> {
    let report = handle_resync(&state.engine, Someone::local(id)).await?;
    Ok(Json(report))
}

/// GET /debug - Diagnostic dump.
async fn debug_handler(State(state): State<AppState>) -> String {
    state.engine.debug_dump()
}
