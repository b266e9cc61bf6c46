//! vrcast relay - forwards signaling frames between a streamer and a viewer.
//!
//! The relay never interprets session descriptions or candidates. It reads the
//! envelope's event name to reject junk, then hands the original frame to the
//! [`router`], which delivers it to the other channel(s) in the sender's scope.

#![forbid(unsafe_code)]

pub mod config;
pub mod router;
pub mod security;
pub mod signal;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use config::RelayConfig;
pub use router::{RouterHandle, RouterStats, Scope};

#[derive(Clone)]
pub struct AppState {
    pub router: RouterHandle,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Spawns the router task; must be called inside a tokio runtime.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            router: RouterHandle::spawn(),
            config: Arc::new(config),
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.stats().await)
}

pub fn app(state: AppState) -> Router {
    let cors = state.config.origins.cors_layer();
    Router::new()
        .route("/", get(|| async { "vrcast relay online" }))
        .route("/health", get(health))
        .route("/ws", get(signal::ws_handler))
        .route("/ws/:session", get(signal::ws_session_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the relay on an already bound listener, stopping once `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    config: RelayConfig,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = app(AppState::new(config));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
