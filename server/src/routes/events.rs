//! Change notification routes.

use axum::{extract::State, routing::post, Json, Router};

use crate::error::Result;
use crate::handlers::{
    handle_local_change, handle_remote_change, ChangeResponse, LocalChangeRequest,
    RemoteChangeRequest,
};
use crate::AppState;

/// Create event routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events/remote", post(remote_handler))
        .route("/events/local", post(local_handler))
}

/// POST /events/remote - A remote attribute changed.
async fn remote_handler(
    State(state): State<AppState>,
    Json(request): Json<RemoteChangeRequest>,
) -> Json<ChangeResponse> {
    Json(handle_remote_change(&state.engine, request).await)
}

/// POST /events/local - A local group changed.
async fn local_handler(
    State(state): State<AppState>,
    Json(request): Json<LocalChangeRequest>,
) -> Result<Json<ChangeResponse>> {
    let response = handle_local_change(&state.engine, request).await?;
    Ok(Json(response))
}
