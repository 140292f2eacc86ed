pub mod adapter;
pub mod config;
pub mod routes;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use textale_gateway::{SessionConfig, Services};

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub session_config: SessionConfig,
}

/// HTTP routes plus the `/session` WebSocket. Serve with
/// `into_make_service_with_connect_info::<SocketAddr>()`; the session
/// handler needs the peer address for ban checks and preferences.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/channels", get(routes::list_channels))
        .route("/channels/{name}/messages", get(routes::get_history))
        .route("/session", get(routes::session_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
