use axum::{Json, Router, extract::State, routing::get};
use meshcall_protocol::IceServerConfig;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // ICE server configuration for clients
        .route("/api/ice-servers", get(get_ice_servers))
        // Signaling WebSocket
        .route("/ws", get(ws::handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServerConfig>,
}

async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    let mut ice_servers = vec![];

    for stun_url in &state.config.stun_servers {
        ice_servers.push(IceServerConfig {
            urls: vec![stun_url.clone()],
            username: None,
            credential: None,
        });
    }

    for turn in &state.config.turn_servers {
        ice_servers.push(IceServerConfig {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
    }

    Json(IceServersResponse { ice_servers })
}
