/**
 * Router Configuration
 *
 * Combines the WebSocket, document API and health routes into a single
 * Axum router with request tracing.
 */
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::backend::collab::SessionRegistry;
use crate::backend::routes::api_routes::configure_api_routes;
use crate::backend::routes::ws_routes::configure_ws_routes;
use crate::backend::server::state::AppState;

/// Create the Axum router with all routes configured
///
/// 1. **WebSocket Routes**: `/ws/{document_id}`
/// 2. **API Routes**: `/api/documents` (Bearer auth)
/// 3. **Health**: `/health`
/// 4. **Fallback Handler**: 404
pub fn create_router(app_state: AppState) -> Router<()> {
    let router = Router::new();
    let router = configure_ws_routes(router);
    let router = configure_api_routes(router, app_state.clone());

    router
        .route("/health", get(health))
        .fallback(|| async { (axum::http::StatusCode::NOT_FOUND, "404 Not Found") })
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub live_sessions: usize,
}

pub async fn health(State(registry): State<SessionRegistry>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        live_sessions: registry.session_count().await,
    })
}
