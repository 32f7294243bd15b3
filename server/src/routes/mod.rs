//! HTTP route definitions.

mod events;
mod health;
mod sandbox;
mod sync;

pub use health::HealthResponse;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(events::routes())
        .merge(sync::routes())
        .merge(sandbox::routes())
}
