//! Axum app: state, router, and WebSocket upgrade handler.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
    routing::get,
    Router,
};

use pulsebot::LogStore;

use super::connection::handle_socket;

#[derive(Clone)]
pub struct AppState {
    pub logs: Arc<dyn LogStore>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/:channel", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, channel, state))
}
