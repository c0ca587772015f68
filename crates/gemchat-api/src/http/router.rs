//! Axum router configuration with middleware.
//!
//! Chat routes are under `/api/v1/chat/`; `/health` sits at the root.
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::extract::State;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let chat_routes = Router::new()
        .route("/start_session", post(handlers::chat::start_session))
        .route("/send_message", post(handlers::chat::send_message))
        .route("/history/{session_id}", get(handlers::chat::get_history))
        .route("/session/{session_id}", delete(handlers::chat::delete_session));

    Router::new()
        .nest("/api/v1/chat", chat_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - liveness plus the number of live sessions.
async fn health_check(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    let sessions = match state.chat_service.session_count().await {
        Ok(count) => serde_json::json!(count),
        Err(e) => {
            tracing::warn!(error = %e, "Session count unavailable");
            serde_json::Value::Null
        }
    };

    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.chat_service.backend_name(),
        "sessions": sessions,
    }))
}
