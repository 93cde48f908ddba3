use crate::observer::QueueChannel;
use crate::subscription::ConnectionManager;
use crate::world::MissionRegistry;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

/// Shared application state for WebSocket handler
#[derive(Clone)]
pub struct WsAppState {
    pub registry: Arc<MissionRegistry>,
    pub baseline_on_subscribe: bool,
}

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsAppState>>,
) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create WebSocket router
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .with_state(state)
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<WsAppState>) {
    // Missions write into this queue; the manager drains it onto the socket
    let (channel, outbound_rx) = QueueChannel::pair();

    let manager = ConnectionManager::new(
        Arc::clone(&state.registry),
        channel,
        state.baseline_on_subscribe,
    );

    manager.handle(socket, outbound_rx).await;
}
