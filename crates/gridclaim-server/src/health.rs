use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub games: GameInfo,
    pub connections: ConnectionInfo,
}

#[derive(Serialize)]
pub struct GameInfo {
    /// Games created since startup.
    pub total: usize,
    /// Games with at least one registered connection.
    pub connected: usize,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    /// Open sockets.
    pub websocket: usize,
    /// Sockets attached to a game player.
    pub registered: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let websocket = state.ws_connection_count.load(Ordering::Relaxed);
    let (connected, registered) = state.connections.stats();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        games: GameInfo {
            total: state.store.len(),
            connected,
        },
        connections: ConnectionInfo {
            websocket,
            registered,
        },
    })
}
