/**
 * Server Initialization
 *
 * Picks a document store, builds the application state and mounts the
 * router.
 */
use std::sync::Arc;

use axum::Router;

use crate::backend::auth::JwtKeys;
use crate::backend::routes::router::create_router;
use crate::backend::server::config::{load_database, ServerConfig, StartupError};
use crate::backend::server::state::AppState;
use crate::backend::store::{DocumentStore, MemoryDocumentStore, PgDocumentStore};

/// Create and configure the Axum application
///
/// # Returns
///
/// The router, plus the state it serves so the caller can shut the
/// registry down after the listener stops.
///
/// # Error Handling
///
/// Invalid engine configuration is an error, and so is a configured
/// database that cannot be reached or migrated. Only an unset
/// `DATABASE_URL` selects the in-memory store.
pub async fn create_app(config: &ServerConfig) -> Result<(Router, AppState), StartupError> {
    tracing::info!("[Server] Initializing collaboration server");

    let engine = config.engine_config()?;
    tracing::info!(
        "[Server] Engine: flush every {:?} or {} versions, mailbox {} frames",
        engine.flush_interval,
        engine.flush_threshold,
        engine.mailbox_capacity
    );

    let store: Arc<dyn DocumentStore> = match load_database(config.database_url.as_deref()).await? {
        Some(pool) => Arc::new(PgDocumentStore::new(pool)),
        None => Arc::new(MemoryDocumentStore::new()),
    };

    let app_state = AppState::new(store, engine, JwtKeys::from_secret(config.jwt_secret.as_bytes()));
    let app = create_router(app_state.clone());

    tracing::info!("[Server] Router configured");
    Ok((app, app_state))
}
