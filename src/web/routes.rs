use axum::{
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::producer_ws::producer_ws_handler;
use super::signaling_ws::signaling_ws_handler;
use super::stream_ws::stream_ws_handler;
use super::ws::ws_handler;
use crate::state::AppState;
use crate::transport::negotiator::{SIGNALING_PATH, STREAM_PATH};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Negotiation and session management
    let session_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/capabilities", get(handlers::get_capabilities))
        .route("/negotiate", post(handlers::negotiate_transport))
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/:id/report", post(handlers::submit_report))
        .route("/stats", get(handlers::get_stats))
        // Lifecycle events for the producer application shell
        .route("/ws", any(ws_handler));

    // Configuration management (domain-separated endpoints)
    let config_routes = Router::new()
        .route("/config", get(handlers::config::get_all_config))
        .route(
            "/config/quality",
            get(handlers::config::get_quality_config)
                .patch(handlers::config::update_quality_config),
        )
        .route(
            "/config/transport",
            get(handlers::config::get_transport_config)
                .patch(handlers::config::update_transport_config),
        );

    let api_routes = Router::new().merge(session_routes).merge(config_routes);

    // Transport endpoints handed out in negotiation results
    let transport_routes = Router::new()
        .route(STREAM_PATH, any(stream_ws_handler))
        .route(SIGNALING_PATH, any(signaling_ws_handler))
        .route("/ws/producer", any(producer_ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .merge(transport_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
