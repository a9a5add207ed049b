use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::security::API_KEY_HEADER;
use crate::server::handlers::{config, health, sessions};
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Creates the application router: health/status, config, sessions and the
/// WebSocket chat endpoint, wrapped in CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route(
            "/api/config",
            get(config::get_config).patch(config::patch_config),
        )
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/:session_id/clear",
            post(sessions::clear_session),
        )
        .route("/api/sessions/:session_id/ask", post(sessions::ask))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let allowed_origins = state
        .settings
        .allowed_origins()
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
        ])
}
