//! Attrsync Server - host process for the attribute sync engine.
//!
//! Exposes change notifications, resyncs and the diagnostic dump over HTTP,
//! backed by the in-memory providers. The sandbox routes stand in for the
//! external chat service and permission store.

pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::backend::Backend;
use attrsync_engine::SyncEngine;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub backend: Arc<Backend>,
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
