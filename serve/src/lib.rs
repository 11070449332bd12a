//! WebSocket channel façade for PulseBot (axum + ws).
//!
//! A channel is a WebSocket at `/ws/:channel`. Incoming text frames become
//! `user_input` rows targeted at the agent; rows targeted at
//! `channel:<name>` are tailed and forwarded as JSON frames, so clients see
//! tool-status broadcasts and the final response in log order.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod connection;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use pulsebot::LogStore;

pub use app::{router, AppState};

/// Runs the façade on `addr` until the process ends.
pub async fn run_serve(
    addr: &str,
    logs: Arc<dyn LogStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, logs).await
}

/// Runs the façade on an existing listener. Tests bind to `127.0.0.1:0` and
/// pass the listener in.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    logs: Arc<dyn LogStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("channel facade listening on ws://{addr}");
    let state = Arc::new(AppState { logs });
    axum::serve(listener, router(state)).await?;
    Ok(())
}
