//! Attrsync Server entry point.

use attrsync_engine::{PairTimers, SyncCause};
use attrsync_server::backend::Backend;
use attrsync_server::config::Config;
use attrsync_server::{app, AppState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "attrsync_server=debug,attrsync_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let sync_config = config.load_sync_config()?;
    let seed = config.load_seed()?;

    tracing::info!("Starting Attrsync Server on {}:{}", config.host, config.port);

    // Wire backend and engine
    let (events, changes) = mpsc::unbounded_channel();
    let backend = Backend::from_seed(&seed, events);
    let engine = backend.engine(sync_config)?;
    let _listener = engine.listen(changes);
    let _timers = PairTimers::start(&engine);

    if engine.is_enabled() {
        match engine.resync_all_with_cause(SyncCause::ModuleStartup).await {
            Ok(reports) => {
                let changed: usize = reports.iter().map(|r| r.changed_count()).sum();
                tracing::info!(identities = reports.len(), changed, "Startup resync finished");
            }
            Err(fail) => tracing::warn!(error = %fail, "Startup resync skipped"),
        }
    }

    // Build application state
    let state = AppState {
        engine,
        backend: Arc::new(backend),
    };

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
