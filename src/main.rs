use anyhow::{Context, Result};
use missionsync::api::{create_query_router, create_ws_router, QueryAppState, WsAppState};
use missionsync::config::{load_config, SyncConfig};
use missionsync::store::{persist_mission, SqliteStore};
use missionsync::world::MissionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "missionsync=info".into()),
        )
        .init();

    info!("missionsync starting...");

    let config = match std::env::var("MISSIONSYNC_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        Err(_) => {
            info!("MISSIONSYNC_CONFIG not set, using defaults");
            SyncConfig::default()
        }
    };

    // Open storage and restore the world
    let store = SqliteStore::with_busy_timeout(
        &config.storage.database_path,
        Duration::from_millis(config.storage.busy_timeout_ms),
    )
    .with_context(|| format!("Failed to open store at {}", config.storage.database_path))?;

    let registry = Arc::new(MissionRegistry::new(config.replication.clone()));
    registry.load_from_store(&store)?;

    // Start HTTP/WebSocket server
    let ws_state = Arc::new(WsAppState {
        registry: Arc::clone(&registry),
        baseline_on_subscribe: config.replication.baseline_on_subscribe,
    });
    let query_state = Arc::new(QueryAppState {
        registry: Arc::clone(&registry),
    });

    let app = create_ws_router(ws_state)
        .merge(create_query_router(query_state))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "missionsync listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();

    // Flush every live mission before exit
    let mut saved = 0;
    for object_id in registry.object_ids() {
        let Some(mission) = registry.get(object_id) else {
            continue;
        };
        match persist_mission(&mission, &store) {
            Ok(_) => saved += 1,
            Err(e) => warn!(object_id = %object_id, error = %e, "Failed to persist mission"),
        }
    }
    info!(missions = saved, "missionsync stopped");

    Ok(())
}
